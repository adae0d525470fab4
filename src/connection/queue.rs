//! FIFO of pending requests.
//!
//! The head of the queue is the in-flight request: it is *peeked* when its
//! wire messages go out and only *popped* once the backend answered with
//! `ReadyForQuery`, so a late `ErrorResponse` always has a request to attach
//! to and replies fire even for internally injected commands.
use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::{
    Result,
    common::ByteStr,
    connection::listeners::ListenerHandle,
    error::Error,
    row::QueryResult,
    types::Oid,
    value::Value,
};

/// Per-query type hints, skipping the `Describe` round trip.
///
/// Both lists are required together.
#[derive(Debug, Clone)]
pub struct TypeHints {
    pub param_types: Vec<Oid>,
    pub result_types: Vec<Oid>,
}

/// A queued client request with its reply destination.
///
/// A `None` reply slot marks an internally injected command whose outcome
/// is discarded.
pub(crate) enum Request {
    /// Synthetic head request refreshing the type registry at connect.
    Bootstrap,
    Query {
        sql: ByteStr,
        params: Vec<Value>,
        hints: Option<TypeHints>,
        reply: Option<oneshot::Sender<Result<QueryResult>>>,
    },
    /// A `LISTEN` round trip; the handle is already registered and is
    /// delivered once the backend confirmed the subscription.
    Listen {
        channel: ByteStr,
        handle: ListenerHandle,
        reply: Option<oneshot::Sender<Result<ListenerHandle>>>,
    },
    /// An `UNLISTEN` round trip draining an emptied channel.
    Unlisten {
        channel: ByteStr,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
}

impl Request {
    /// Deliver the outcome to whoever is waiting, if anyone.
    pub(crate) fn reply(self, outcome: Result<QueryResult>) {
        match self {
            Request::Bootstrap => {}
            Request::Query { reply, .. } => {
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            Request::Listen { handle, reply, .. } => {
                if let Some(reply) = reply {
                    let _ = reply.send(outcome.map(|_| handle));
                }
            }
            Request::Unlisten { reply, .. } => {
                if let Some(reply) = reply {
                    let _ = reply.send(outcome.map(drop));
                }
            }
        }
    }

    /// Deliver a terminal error on shutdown.
    pub(crate) fn reject(self) {
        self.reply(Err(Error::closed()));
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Bootstrap => f.write_str("Bootstrap"),
            Request::Query { sql, params, .. } => f
                .debug_struct("Query")
                .field("sql", sql)
                .field("params", &params.len())
                .finish_non_exhaustive(),
            Request::Listen { channel, handle, .. } => f
                .debug_struct("Listen")
                .field("channel", channel)
                .field("handle", handle)
                .finish_non_exhaustive(),
            Request::Unlisten { channel, .. } => f
                .debug_struct("Unlisten")
                .field("channel", channel)
                .finish_non_exhaustive(),
        }
    }
}

/// FIFO with head-put-back for internally injected requests.
#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    inner: VecDeque<Request>,
}

impl RequestQueue {
    pub(crate) fn new() -> RequestQueue {
        RequestQueue { inner: VecDeque::new() }
    }

    /// Append a client request.
    pub(crate) fn push_back(&mut self, request: Request) {
        self.inner.push_back(request);
    }

    /// Inject an internal request to run next, while the queue is idle.
    pub(crate) fn inject_front(&mut self, request: Request) {
        self.inner.push_front(request);
    }

    /// Inject an internal request right behind the in-flight head.
    pub(crate) fn inject_after_head(&mut self, request: Request) {
        self.inner.insert(1.min(self.inner.len()), request);
    }

    /// The in-flight (or next-to-start) request.
    pub(crate) fn head(&self) -> Option<&Request> {
        self.inner.front()
    }

    pub(crate) fn head_mut(&mut self) -> Option<&mut Request> {
        self.inner.front_mut()
    }

    /// Pop the completed head.
    pub(crate) fn pop_head(&mut self) -> Option<Request> {
        self.inner.pop_front()
    }

    /// Drain every queued request, for terminal delivery.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Request> + '_ {
        self.inner.drain(..)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
