//! A scripted postgres backend for driving the connection end to end.
#![allow(dead_code)]

use std::collections::HashMap;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use postbox::Config;

/// Bind a listener and a config pointing at it, bootstrap disabled.
pub async fn harness() -> (TcpListener, Config) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = Config::new("testdb")
        .set_host("127.0.0.1")
        .set_port(port)
        .set_user("tester")
        .set_fetch_types(false);
    (listener, config)
}

pub struct MockBackend {
    socket: TcpStream,
}

impl MockBackend {
    pub async fn accept(listener: &TcpListener) -> MockBackend {
        let (socket, _) = listener.accept().await.unwrap();
        MockBackend { socket }
    }

    /// Read the startup message and answer `AuthenticationOk` plus the
    /// usual post-auth traffic up to `ReadyForQuery`.
    pub async fn handshake(&mut self) -> HashMap<String, String> {
        let params = self.read_startup().await;
        self.auth_ok().await;
        self.parameter_status("server_version", "16.3").await;
        self.backend_key_data(4242, 117).await;
        self.ready().await;
        params
    }

    /// Read the length-prefixed startup message; returns its parameters.
    pub async fn read_startup(&mut self) -> HashMap<String, String> {
        let len = self.socket.read_i32().await.unwrap() as usize;
        let mut body = vec![0u8; len - 4];
        self.socket.read_exact(&mut body).await.unwrap();

        let version = i32::from_be_bytes(body[..4].try_into().unwrap());
        assert_eq!(version, 196608, "expected protocol 3.0");

        let mut params = HashMap::new();
        let mut rest = &body[4..];
        loop {
            let Some(end) = rest.iter().position(|b| *b == 0) else {
                break;
            };
            if end == 0 {
                break;
            }
            let name = String::from_utf8(rest[..end].to_vec()).unwrap();
            rest = &rest[end + 1..];
            let end = rest.iter().position(|b| *b == 0).unwrap();
            let value = String::from_utf8(rest[..end].to_vec()).unwrap();
            rest = &rest[end + 1..];
            params.insert(name, value);
        }
        params
    }

    /// Read the 8-byte `SSLRequest` preamble.
    pub async fn read_ssl_request(&mut self) {
        let len = self.socket.read_i32().await.unwrap();
        assert_eq!(len, 8);
        let code = self.socket.read_i32().await.unwrap();
        assert_eq!(code, 80877103);
    }

    pub async fn refuse_ssl(&mut self) {
        self.socket.write_all(b"N").await.unwrap();
    }

    /// Read one regular frontend message; returns `(tag, body)`.
    pub async fn read_message(&mut self) -> (u8, Vec<u8>) {
        let tag = self.socket.read_u8().await.unwrap();
        let len = self.socket.read_i32().await.unwrap() as usize;
        let mut body = vec![0u8; len - 4];
        self.socket.read_exact(&mut body).await.unwrap();
        (tag, body)
    }

    /// Expect a simple `Query` and return its sql.
    pub async fn read_query(&mut self) -> String {
        let (tag, body) = self.read_message().await;
        assert_eq!(tag, b'Q', "expected Query, got {:?}", tag as char);
        let sql = &body[..body.len() - 1]; // drop the nul
        String::from_utf8(sql.to_vec()).unwrap()
    }

    /// Consume an extended-query pipeline up to `Sync`; returns the tags
    /// seen, e.g. `b"PDBES"`.
    pub async fn read_until_sync(&mut self) -> Vec<u8> {
        let mut tags = vec![];
        loop {
            let (tag, _) = self.read_message().await;
            tags.push(tag);
            if tag == b'S' {
                return tags;
            }
        }
    }

    /// Send an arbitrary frame, for protocol-violation scripts.
    pub async fn send_raw(&mut self, tag: u8, body: &[u8]) {
        self.send(tag, body).await;
    }

    async fn send(&mut self, tag: u8, body: &[u8]) {
        let mut msg = Vec::with_capacity(5 + body.len());
        msg.push(tag);
        msg.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
        msg.extend_from_slice(body);
        self.socket.write_all(&msg).await.unwrap();
    }

    pub async fn auth_ok(&mut self) {
        self.send(b'R', &0i32.to_be_bytes()).await;
    }

    pub async fn auth_cleartext(&mut self) {
        self.send(b'R', &3i32.to_be_bytes()).await;
    }

    pub async fn auth_md5(&mut self, salt: [u8; 4]) {
        let mut body = 5i32.to_be_bytes().to_vec();
        body.extend_from_slice(&salt);
        self.send(b'R', &body).await;
    }

    /// Expect a `PasswordMessage` and return the password.
    pub async fn read_password(&mut self) -> String {
        let (tag, body) = self.read_message().await;
        assert_eq!(tag, b'p', "expected PasswordMessage");
        String::from_utf8(body[..body.len() - 1].to_vec()).unwrap()
    }

    pub async fn parameter_status(&mut self, name: &str, value: &str) {
        let mut body = vec![];
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        body.extend_from_slice(value.as_bytes());
        body.push(0);
        self.send(b'S', &body).await;
    }

    pub async fn backend_key_data(&mut self, pid: i32, secret: i32) {
        let mut body = pid.to_be_bytes().to_vec();
        body.extend_from_slice(&secret.to_be_bytes());
        self.send(b'K', &body).await;
    }

    pub async fn ready(&mut self) {
        self.send(b'Z', b"I").await;
    }

    /// `RowDescription` with text format for every `(name, oid)` column.
    pub async fn row_description(&mut self, columns: &[(&str, u32)]) {
        let mut body = (columns.len() as i16).to_be_bytes().to_vec();
        for (name, oid) in columns {
            body.extend_from_slice(name.as_bytes());
            body.push(0);
            body.extend_from_slice(&0i32.to_be_bytes()); // table oid
            body.extend_from_slice(&0i16.to_be_bytes()); // column attr
            body.extend_from_slice(&oid.to_be_bytes());
            body.extend_from_slice(&0i16.to_be_bytes()); // type size
            body.extend_from_slice(&(-1i32).to_be_bytes()); // type modifier
            body.extend_from_slice(&0i16.to_be_bytes()); // text
        }
        self.send(b'T', &body).await;
    }

    /// Text-format `DataRow`; `None` is NULL.
    pub async fn data_row(&mut self, values: &[Option<&str>]) {
        let raw: Vec<Option<&[u8]>> = values.iter().map(|v| v.map(str::as_bytes)).collect();
        self.data_row_raw(&raw).await;
    }

    /// `DataRow` with raw (e.g. binary-format) column values.
    pub async fn data_row_raw(&mut self, values: &[Option<&[u8]>]) {
        let mut body = (values.len() as i16).to_be_bytes().to_vec();
        for value in values {
            match value {
                None => body.extend_from_slice(&(-1i32).to_be_bytes()),
                Some(bytes) => {
                    body.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    body.extend_from_slice(bytes);
                }
            }
        }
        self.send(b'D', &body).await;
    }

    pub async fn command_complete(&mut self, tag: &str) {
        let mut body = tag.as_bytes().to_vec();
        body.push(0);
        self.send(b'C', &body).await;
    }

    pub async fn parse_complete(&mut self) {
        self.send(b'1', &[]).await;
    }

    pub async fn bind_complete(&mut self) {
        self.send(b'2', &[]).await;
    }

    pub async fn parameter_description(&mut self, oids: &[u32]) {
        let mut body = (oids.len() as i16).to_be_bytes().to_vec();
        for oid in oids {
            body.extend_from_slice(&oid.to_be_bytes());
        }
        self.send(b't', &body).await;
    }

    pub async fn no_data(&mut self) {
        self.send(b'n', &[]).await;
    }

    pub async fn error_response(&mut self, severity: &str, code: &str, message: &str) {
        let mut body = vec![];
        for (field, value) in [(b'S', severity), (b'C', code), (b'M', message)] {
            body.push(field);
            body.extend_from_slice(value.as_bytes());
            body.push(0);
        }
        body.push(0);
        self.send(b'E', &body).await;
    }

    pub async fn notification(&mut self, pid: i32, channel: &str, payload: &str) {
        let mut body = pid.to_be_bytes().to_vec();
        body.extend_from_slice(channel.as_bytes());
        body.push(0);
        body.extend_from_slice(payload.as_bytes());
        body.push(0);
        self.send(b'A', &body).await;
    }

    /// Respond to a row-returning query in one go.
    pub async fn simple_result(&mut self, columns: &[(&str, u32)], rows: &[&[Option<&str>]], tag: &str) {
        self.row_description(columns).await;
        for row in rows {
            self.data_row(row).await;
        }
        self.command_complete(tag).await;
        self.ready().await;
    }

    /// Respond to a row-less command, e.g. `LISTEN`.
    pub async fn command_result(&mut self, tag: &str) {
        self.command_complete(tag).await;
        self.ready().await;
    }

    /// Expect the `Terminate` message.
    pub async fn read_terminate(&mut self) {
        let (tag, _) = self.read_message().await;
        assert_eq!(tag, b'X', "expected Terminate");
    }
}
