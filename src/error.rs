//! `postbox` error types.
use std::{backtrace::Backtrace, borrow::Cow, fmt, io};

use crate::{
    connection::ParseError,
    postgres::{ProtocolError, ServerError},
    value::DecodeError,
};

/// A specialized [`Result`] type for `postbox` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `postbox` library.
pub struct Error {
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// The structured server error, if this is one.
    pub fn as_server(&self) -> Option<&ServerError> {
        match &self.kind {
            ErrorKind::Server(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` if the connection is gone for good.
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::Closed(_))
    }

    pub(crate) fn argument(reason: impl Into<Cow<'static, str>>) -> Error {
        ArgumentError { reason: reason.into() }.into()
    }

    pub(crate) fn closed() -> Error {
        ConnectionClosed.into()
    }
}

/// All possible error kind from `postbox` library.
pub enum ErrorKind {
    /// Malformed configuration or connection url.
    Config(ParseError),
    /// TCP connect, TLS handshake, or pre-authentication protocol failure.
    Connect(ConnectError),
    /// Authentication rejected or unsupported.
    Auth(AuthError),
    /// Out-of-sequence message, unparseable frame, or phase mismatch.
    Protocol(ProtocolError),
    /// `ErrorResponse` received in a query context; the connection recovers.
    Server(ServerError),
    /// Caller supplied an invalid argument; the connection is untouched.
    Argument(ArgumentError),
    /// A column value did not decode.
    Decode(DecodeError),
    Io(io::Error),
    /// The per-call deadline elapsed; the request keeps its queue slot.
    Timeout(tokio::time::error::Elapsed),
    /// The connection terminated; pending and future calls get this.
    Closed(ConnectionClosed),
}

/// Failure before the connection reached the authenticated state.
#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct ConnectError {
    reason: Cow<'static, str>,
}

impl ConnectError {
    pub(crate) fn new(reason: impl Into<Cow<'static, str>>) -> ConnectError {
        ConnectError { reason: reason.into() }
    }
}

/// Authentication rejected or unsupported.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unsupported authentication method requested by the server")]
    Unsupported,
    #[error("authentication rejected: {0}")]
    Rejected(ServerError),
}

/// Caller supplied an invalid argument.
#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct ArgumentError {
    reason: Cow<'static, str>,
}

/// The connection terminated.
#[derive(Debug, thiserror::Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ConnectError>e => ErrorKind::Connect(e));
from!(<AuthError>e => ErrorKind::Auth(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<ServerError>e => ErrorKind::Server(e));
from!(<ArgumentError>e => ErrorKind::Argument(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<tokio::time::error::Elapsed>e => ErrorKind::Timeout(e));
from!(<ConnectionClosed>e => ErrorKind::Closed(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Connect(e) => e.fmt(f),
            Self::Auth(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Server(e) => e.fmt(f),
            Self::Argument(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Timeout(e) => e.fmt(f),
            Self::Closed(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
