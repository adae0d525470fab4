//! Postgres connection core.
//!
//! One TCP (optionally TLS) session speaking the v3 wire protocol, driven
//! by a single supervisor task. Client requests are queued and executed one
//! at a time in submission order, while asynchronous `NOTIFY` traffic fans
//! out to subscribers as it arrives.
//!
//! # Examples
//!
//! Queries:
//!
//! ```no_run
//! use postbox::{Connection, Value};
//!
//! # async fn app() -> postbox::Result<()> {
//! let conn = Connection::connect_env().await?;
//!
//! let res = conn.query("SELECT $1::int + $2::int", vec![40.into(), 2.into()]).await?;
//! assert_eq!(res.rows[0][0], Value::Int4(42));
//!
//! # Ok(())
//! # }
//! ```
//!
//! `LISTEN`/`NOTIFY`:
//!
//! ```no_run
//! use postbox::Connection;
//!
//! # async fn app() -> postbox::Result<()> {
//! let conn = Connection::connect_env().await?;
//!
//! let (handle, mut notifications) = conn.subscribe("events").await?;
//!
//! // a parallel session runs: NOTIFY events, 'hello'
//! let n = notifications.recv().await.unwrap();
//! assert_eq!(n.channel, "events");
//! assert_eq!(n.payload, "hello");
//!
//! conn.unlisten(handle).await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
mod ext;
mod net;

// Protocol
pub mod postgres;

pub mod framer;

// Encoding
pub mod types;
mod value;

// Component
pub mod row;

// Connection
pub mod connection;

mod error;

#[doc(inline)]
pub use connection::{Config, Connection, ListenerHandle, Notification, TypeHints};
#[doc(inline)]
pub use error::{Error, ErrorKind, Result};
#[doc(inline)]
pub use row::QueryResult;
#[doc(inline)]
pub use types::{Oid, TypeRegistry};
#[doc(inline)]
pub use value::{DecodeError, EncodedValue, Value};
