//! Protocol level errors.
use bytes::{Buf, Bytes};

use crate::{common::ByteStr, ext::BytesExt};

/// An error when translating buffer from postgres.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message type ({:?})", char::from(*found))]
    Unknown { found: u8 },
    #[error("unexpected message ({:?}) while {phase}", char::from(*found))]
    UnexpectedPhase { found: u8, phase: &'static str },
    #[error("expected {expect} message, found ({:?})", char::from(*found))]
    Unexpected { expect: &'static str, found: u8 },
    #[error("invalid frame length ({len})")]
    FrameLength { len: i32 },
    #[error("message string not nul terminated")]
    MissingNul,
    #[error("message string is not utf-8: {0}")]
    NonUtf8(std::str::Utf8Error),
    #[error("unknown authentication method ({auth})")]
    UnknownAuth { auth: i32 },
    #[error("malformed {message} message body")]
    Malformed { message: &'static str },
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unknown { found }
    }

    pub(crate) fn unexpected(expect: &'static str, found: u8) -> ProtocolError {
        Self::Unexpected { expect, found }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::UnexpectedPhase { found, phase }
    }

    pub(crate) fn frame_length(len: i32) -> ProtocolError {
        Self::FrameLength { len }
    }

    pub(crate) fn missing_nul() -> ProtocolError {
        Self::MissingNul
    }

    pub(crate) fn non_utf8(err: std::str::Utf8Error) -> ProtocolError {
        Self::NonUtf8(err)
    }

    pub(crate) fn unknown_auth(auth: i32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }

    pub(crate) fn malformed(message: &'static str) -> ProtocolError {
        Self::Malformed { message }
    }
}

/// A structured `ErrorResponse` sent by the backend.
///
/// The message body consists of one or more identified fields, followed by a
/// zero byte as a terminator. Fields can appear in any order, and unrecognized
/// field types are skipped.
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Debug, Clone, Default)]
pub struct ServerError {
    pub severity: ByteStr,
    pub code: ByteStr,
    pub message: ByteStr,
    pub detail: Option<ByteStr>,
    pub hint: Option<ByteStr>,
    pub position: Option<u32>,
    pub where_: Option<ByteStr>,
    pub schema: Option<ByteStr>,
    pub table: Option<ByteStr>,
    pub column: Option<ByteStr>,
    pub constraint: Option<ByteStr>,
    pub file: Option<ByteStr>,
    pub line: Option<ByteStr>,
    pub routine: Option<ByteStr>,
}

impl ServerError {
    pub(crate) fn from_body(mut body: Bytes) -> Result<ServerError, ProtocolError> {
        let mut me = ServerError::default();

        while body.has_remaining() {
            let field = body.get_u8();
            if field == 0 {
                break;
            }
            let value = body.get_nul_bytestr()?;
            match field {
                b'S' => me.severity = value,
                b'C' => me.code = value,
                b'M' => me.message = value,
                b'D' => me.detail = Some(value),
                b'H' => me.hint = Some(value),
                b'P' => me.position = value.parse().ok(),
                b'W' => me.where_ = Some(value),
                b's' => me.schema = Some(value),
                b't' => me.table = Some(value),
                b'c' => me.column = Some(value),
                b'n' => me.constraint = Some(value),
                b'F' => me.file = Some(value),
                b'L' => me.line = Some(value),
                b'R' => me.routine = Some(value),
                _ => {} // frontends should silently ignore fields of unrecognized type
            }
        }

        Ok(me)
    }
}

impl std::error::Error for ServerError { }

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)?;
        if let Some(detail) = &self.detail {
            write!(f, "\ndetail: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nhint: {hint}")?;
        }
        Ok(())
    }
}
