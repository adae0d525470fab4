mod common;

use std::time::Duration;

use common::{MockBackend, harness};
use postbox::{Connection, ErrorKind, Value, types::oid};
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn notify_fan_out_and_unlisten() {
    let (listener, config) = harness().await;

    let server = tokio::spawn(async move {
        let mut backend = MockBackend::accept(&listener).await;
        backend.handshake().await;

        assert_eq!(backend.read_query().await, "LISTEN chan");
        backend.command_result("LISTEN").await;

        backend.notification(999, "chan", "hello").await;

        assert_eq!(backend.read_query().await, "UNLISTEN chan");
        backend.command_result("UNLISTEN").await;

        // after the drain nobody is subscribed
        backend.notification(999, "chan", "ignored").await;
    });

    let conn = Connection::connect_with(config).await.unwrap();

    let (handle, mut notifications) = conn.subscribe("chan").await.unwrap();

    let n = notifications.recv().await.unwrap();
    assert_eq!(n.handle, handle);
    assert_eq!(n.channel, "chan");
    assert_eq!(n.payload, "hello");

    conn.unlisten(handle).await.unwrap();
    server.await.unwrap();

    // no further deliveries
    assert!(timeout(Duration::from_millis(200), notifications.recv()).await.is_err());
}

#[tokio::test]
async fn second_subscriber_shares_the_subscription() {
    let (listener, config) = harness().await;

    let server = tokio::spawn(async move {
        let mut backend = MockBackend::accept(&listener).await;
        backend.handshake().await;

        // exactly one LISTEN for two subscribers
        assert_eq!(backend.read_query().await, "LISTEN events");
        backend.command_result("LISTEN").await;

        backend.notification(1, "events", "fan-out").await;

        // both handles gone: one UNLISTEN
        assert_eq!(backend.read_query().await, "UNLISTEN events");
        backend.command_result("UNLISTEN").await;
    });

    let conn = Connection::connect_with(config).await.unwrap();

    let (h1, mut rx1) = conn.subscribe("events").await.unwrap();
    let (h2, mut rx2) = conn.subscribe("events").await.unwrap();
    assert_ne!(h1, h2);

    // the notification reaches both subscribers
    assert_eq!(rx1.recv().await.unwrap().handle, h1);
    assert_eq!(rx2.recv().await.unwrap().handle, h2);

    conn.unlisten(h1).await.unwrap();
    conn.unlisten(h2).await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn subscriber_death_drains_the_channel() {
    let (listener, config) = harness().await;

    let server = tokio::spawn(async move {
        let mut backend = MockBackend::accept(&listener).await;
        backend.handshake().await;

        assert_eq!(backend.read_query().await, "LISTEN c");
        backend.command_result("LISTEN").await;

        // first death leaves a live subscriber: no UNLISTEN
        let quiet = timeout(Duration::from_millis(200), backend.read_message()).await;
        assert!(quiet.is_err(), "unexpected traffic while a subscriber lives");

        // second death drains the channel
        assert_eq!(backend.read_query().await, "UNLISTEN c");
        backend.command_result("UNLISTEN").await;
    });

    let conn = Connection::connect_with(config).await.unwrap();

    let (_h1, rx1) = conn.subscribe("c").await.unwrap();
    let (_h2, rx2) = conn.subscribe("c").await.unwrap();

    drop(rx1);
    sleep(Duration::from_millis(300)).await;
    drop(rx2);

    server.await.unwrap();
}

#[tokio::test]
async fn unlisten_unknown_handle_is_recoverable() {
    let (listener, config) = harness().await;

    let server = tokio::spawn(async move {
        let mut backend = MockBackend::accept(&listener).await;
        backend.handshake().await;

        assert_eq!(backend.read_query().await, "LISTEN q");
        backend.command_result("LISTEN").await;

        assert_eq!(backend.read_query().await, "UNLISTEN q");
        backend.command_result("UNLISTEN").await;

        // the connection survives the argument error
        assert_eq!(backend.read_query().await, "SELECT 1");
        backend
            .simple_result(&[("?column?", oid::INT4)], &[&[Some("1")]], "SELECT 1")
            .await;
    });

    let conn = Connection::connect_with(config).await.unwrap();

    let (handle, _rx) = conn.subscribe("q").await.unwrap();
    conn.unlisten(handle).await.unwrap();

    let err = conn.unlisten(handle).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Argument(_)), "unexpected error: {err}");

    let res = conn.query("SELECT 1", vec![]).await.unwrap();
    assert_eq!(res.rows, [[Value::Int4(1)]]);
    server.await.unwrap();
}

#[tokio::test]
async fn failed_listen_rolls_the_registration_back() {
    let (listener, config) = harness().await;

    let server = tokio::spawn(async move {
        let mut backend = MockBackend::accept(&listener).await;
        backend.handshake().await;

        backend.read_query().await;
        backend.error_response("ERROR", "42601", "syntax error").await;
        backend.ready().await;

        // the retry counts as a first subscriber again
        assert_eq!(backend.read_query().await, "LISTEN bad channel");
        backend.command_result("LISTEN").await;
    });

    let conn = Connection::connect_with(config).await.unwrap();

    let err = conn.subscribe("bad channel").await.unwrap_err();
    assert_eq!(err.as_server().unwrap().code, "42601");

    let (_handle, _rx) = conn.subscribe("bad channel").await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn notification_during_query_is_dispatched_before_the_reply() {
    let (listener, config) = harness().await;

    let server = tokio::spawn(async move {
        let mut backend = MockBackend::accept(&listener).await;
        backend.handshake().await;

        assert_eq!(backend.read_query().await, "LISTEN chan");
        backend.command_result("LISTEN").await;

        backend.read_query().await;
        // the backend emits the notification ahead of the query result
        backend.notification(7, "chan", "early").await;
        backend
            .simple_result(&[("?column?", oid::INT4)], &[&[Some("1")]], "SELECT 1")
            .await;
    });

    let conn = Connection::connect_with(config).await.unwrap();

    let (_handle, mut notifications) = conn.subscribe("chan").await.unwrap();
    conn.query("SELECT 1", vec![]).await.unwrap();

    // wire order preserved: already delivered by the time the reply landed
    let n = notifications.try_recv().unwrap();
    assert_eq!(n.payload, "early");
    server.await.unwrap();
}
