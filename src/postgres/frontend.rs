//! Postgres Frontend Messages
//!
//! All struct fields here mirror the actual message sent to postgres.
use bytes::{BufMut, BytesMut};

use crate::{
    common::ByteStr,
    ext::{BufMutExt, StrExt, UsizeExt},
    postgres::Format,
    types::Oid,
    value::EncodedValue,
};

/// write a frontend message to `buf`
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    // msgtype + length
    const PREFIX: usize = 1 + 4;

    let size = msg.size_hint();
    buf.reserve(PREFIX + size as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);
    buf.put_i32(4 + size);

    msg.encode(&mut *buf);

    assert_eq!(
        buf.len() - offset,
        PREFIX + size as usize,
        "[BUG] Frontend Message body not equal to size hint"
    );
}

/// A type which can be encoded into postgres frontend message
///
/// For historical reasons, the very first message sent by the client (the startup message)
/// has no initial message-type byte.
///
/// Thus, [`Startup`] and [`SslRequest`] do not implement [`FrontendProtocol`]
pub trait FrontendProtocol {
    /// message type
    const MSGTYPE: u8;

    /// size of the main body
    ///
    /// note that this is *only* the size of main body as oppose of actual postgres message
    fn size_hint(&self) -> i32;

    /// write the main body of the message
    ///
    /// `buf` have the length returned from `size_hint`
    ///
    /// writing less or past length results in panic
    fn encode(self, buf: impl BufMut);
}

/// Postgres Startup frontend message
///
/// The protocol version number is followed by pairs of parameter name and
/// value strings; `user` is required, everything else is optional.
#[derive(Debug)]
pub struct Startup<'a> {
    /// The database user name to connect as. Required; there is no default.
    pub user: &'a str,
    /// The database to connect to. Defaults to the user name.
    pub database: &'a str,
    /// Additional run-time parameters applied at backend start.
    pub parameters: &'a [(ByteStr, ByteStr)],
}

impl Startup<'_> {
    /// Int32(196608): major version 3, minor version 0.
    pub const PROTOCOL_VERSION: i32 = 196608;

    pub fn write(self, buf: &mut BytesMut) {
        let offset = buf.len();

        // Length of message contents in bytes, including self.
        // reserve 4 bytes for length
        buf.put_i32(0);

        buf.put_i32(Self::PROTOCOL_VERSION);

        buf.put_nul_string("user");
        buf.put_nul_string(self.user);

        buf.put_nul_string("database");
        buf.put_nul_string(self.database);

        for (name, value) in self.parameters {
            buf.put_nul_string(name);
            buf.put_nul_string(value);
        }

        // A zero byte is required as a terminator after the last name/value pair.
        buf.put_u8(b'\0');

        // write the length
        let mut written_buf = &mut buf[offset..];
        written_buf.put_i32(written_buf.len().to_i32());
    }
}

/// Ask the server to open a TLS channel before the startup message.
///
/// The server answers with a single byte, `'S'` or `'N'`, not a regular frame.
#[derive(Debug)]
pub struct SslRequest;

impl SslRequest {
    /// Int32(80877103): the SSL request code.
    pub const REQUEST_CODE: i32 = 80877103;

    pub fn write(self, buf: &mut BytesMut) {
        buf.put_i32(8);
        buf.put_i32(Self::REQUEST_CODE);
    }
}

/// Identifies the message as a password response.
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    /// The password (encrypted, if requested)
    pub password: &'a str,
}

impl FrontendProtocol for PasswordMessage<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> i32 {
        self.password.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.password);
    }
}

/// Identifies the message as a simple query
pub struct Query<'a> {
    /// the query string itself
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> i32 {
        self.sql.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Identifies the message as a Parse command
pub struct Parse<'a> {
    /// prepared statement name (an empty string selects the unnamed prepared statement).
    pub statement: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
    /// Object IDs of the parameter data types.
    ///
    /// Placing a zero oid leaves the type unspecified.
    pub param_oids: &'a [Oid],
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: u8 = b'P';

    fn size_hint(&self) -> i32 {
        self.statement.nul_string_len()
            + self.sql.nul_string_len()
            + 2
            + self.param_oids.len().to_i32() * 4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.statement);
        buf.put_nul_string(self.sql);
        buf.put_i16(self.param_oids.len().to_i16());
        for oid in self.param_oids {
            buf.put_u32(*oid);
        }
    }
}

/// Identifies the message as a Describe command.
pub struct Describe<'a> {
    /// 'S' to describe a prepared statement; or 'P' to describe a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to describe
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: u8 = b'D';

    fn size_hint(&self) -> i32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as a Bind command.
pub struct Bind<'a> {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal: &'a str,
    /// The name of the source prepared statement (an empty string selects the unnamed prepared statement).
    pub statement: &'a str,
    /// Encoded parameter values; each carries its own transfer format.
    pub params: &'a [EncodedValue],
    /// The result-column format codes.
    ///
    /// Empty means every column uses the default (text) format.
    pub result_formats: &'a [Format],
}

impl FrontendProtocol for Bind<'_> {
    const MSGTYPE: u8 = b'B';

    fn size_hint(&self) -> i32 {
        let params = self.params.iter().fold(0i32, |acc, p| {
            acc + 4 + p.bytes.as_ref().map(|b| b.len().to_i32()).unwrap_or(0)
        });

        self.portal.nul_string_len()
            + self.statement.nul_string_len()
            + 2
            + self.params.len().to_i32() * 2
            + 2
            + params
            + 2
            + self.result_formats.len().to_i32() * 2
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal);
        buf.put_nul_string(self.statement);

        buf.put_i16(self.params.len().to_i16());
        for param in self.params {
            buf.put_i16(param.format.code());
        }

        buf.put_i16(self.params.len().to_i16());
        for param in self.params {
            match &param.bytes {
                // -1 indicates a NULL parameter value, no value bytes follow
                None => buf.put_i32(-1),
                Some(bytes) => {
                    buf.put_i32(bytes.len().to_i32());
                    buf.put_slice(bytes);
                }
            }
        }

        buf.put_i16(self.result_formats.len().to_i16());
        for format in self.result_formats {
            buf.put_i16(format.code());
        }
    }
}

/// Identifies the message as an Execute command
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal: &'a str,
    /// Maximum number of rows to return, if portal contains a query that returns rows
    /// (ignored otherwise). Zero denotes "no limit".
    pub max_rows: i32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn size_hint(&self) -> i32 {
        self.portal.nul_string_len() + 4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal);
        buf.put_i32(self.max_rows);
    }
}

/// Identifies the message as a Sync command
pub struct Sync;

impl FrontendProtocol for Sync {
    const MSGTYPE: u8 = b'S';

    fn size_hint(&self) -> i32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a termination.
pub struct Terminate;

impl FrontendProtocol for Terminate {
    const MSGTYPE: u8 = b'X';

    fn size_hint(&self) -> i32 { 0 }

    fn encode(self, _: impl BufMut) { }
}
