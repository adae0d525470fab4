//! Column and parameter values, plus the builtin codec.
//!
//! The builtin codec covers the primitive types; custom codecs hook in
//! through the `encoder`/`decoder` callbacks on
//! [`Config`][crate::connection::Config]. A value of an oid nobody knows
//! how to decode falls back to the raw bytes as a string.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    common::ByteStr,
    postgres::Format,
    types::{Oid, oid},
};

/// A single column or parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(ByteStr),
    Bytes(Bytes),
}

/// A parameter value encoded for the wire, as placed into `Bind`.
#[derive(Debug, Clone)]
pub struct EncodedValue {
    pub oid: Oid,
    pub format: Format,
    /// `None` is SQL NULL.
    pub bytes: Option<Bytes>,
}

/// Whether the builtin codec knows this oid.
pub(crate) fn has_builtin_codec(type_oid: Oid) -> bool {
    matches!(
        type_oid,
        oid::BOOL
            | oid::INT2
            | oid::INT4
            | oid::INT8
            | oid::OID
            | oid::FLOAT4
            | oid::FLOAT8
            | oid::TEXT
            | oid::VARCHAR
            | oid::BPCHAR
            | oid::NAME
            | oid::CHAR
            | oid::BYTEA
    )
}

/// The transfer format the builtin codec prefers for a result column:
/// binary when a binary codec is known for the oid, text otherwise.
pub(crate) fn default_format(type_oid: Oid) -> Format {
    match has_builtin_codec(type_oid) {
        true => Format::Binary,
        false => Format::Text,
    }
}

/// An error when decoding a column value.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid value length {len} for oid {oid}")]
    Length { oid: Oid, len: usize },
    #[error("value is not utf-8: {0}")]
    NonUtf8(#[from] std::str::Utf8Error),
    #[error("malformed text value for oid {oid}")]
    Parse { oid: Oid },
}

impl Value {
    /// The oid the builtin encoder assigns to this value.
    ///
    /// [`Value::Null`] is oid zero, leaving the type unspecified.
    pub fn oid(&self) -> Oid {
        match self {
            Value::Null => 0,
            Value::Bool(_) => oid::BOOL,
            Value::Int2(_) => oid::INT2,
            Value::Int4(_) => oid::INT4,
            Value::Int8(_) => oid::INT8,
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Text(_) => oid::TEXT,
            Value::Bytes(_) => oid::BYTEA,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encode with the builtin codec.
    pub(crate) fn encode(&self, format: Format) -> EncodedValue {
        let bytes = match format {
            Format::Binary => self.encode_binary(),
            Format::Text => self.encode_text(),
        };
        EncodedValue { oid: self.oid(), format, bytes }
    }

    fn encode_binary(&self) -> Option<Bytes> {
        let mut buf = BytesMut::new();
        match self {
            Value::Null => return None,
            Value::Bool(v) => buf.put_u8(*v as u8),
            Value::Int2(v) => buf.put_i16(*v),
            Value::Int4(v) => buf.put_i32(*v),
            Value::Int8(v) => buf.put_i64(*v),
            Value::Float4(v) => buf.put_f32(*v),
            Value::Float8(v) => buf.put_f64(*v),
            Value::Text(v) => return Some(v.clone().into_bytes()),
            Value::Bytes(v) => return Some(v.clone()),
        }
        Some(buf.freeze())
    }

    fn encode_text(&self) -> Option<Bytes> {
        match self {
            Value::Null => None,
            Value::Bool(v) => Some(Bytes::from_static(if *v { b"t" } else { b"f" })),
            Value::Int2(v) => Some(Bytes::from(v.to_string())),
            Value::Int4(v) => Some(Bytes::from(v.to_string())),
            Value::Int8(v) => Some(Bytes::from(v.to_string())),
            Value::Float4(v) => Some(Bytes::from(v.to_string())),
            Value::Float8(v) => Some(Bytes::from(v.to_string())),
            Value::Text(v) => Some(v.clone().into_bytes()),
            Value::Bytes(v) => {
                let mut out = String::with_capacity(2 + v.len() * 2);
                out.push_str("\\x");
                for b in v {
                    out.push_str(&format!("{b:02x}"));
                }
                Some(Bytes::from(out))
            }
        }
    }

    /// Decode with the builtin codec.
    pub(crate) fn decode(oid: Oid, format: Format, raw: Option<Bytes>) -> Result<Value, DecodeError> {
        let Some(raw) = raw else {
            return Ok(Value::Null);
        };
        match format {
            Format::Text => Self::decode_text(oid, raw),
            Format::Binary => Self::decode_binary(oid, raw),
        }
    }

    fn decode_text(type_oid: Oid, raw: Bytes) -> Result<Value, DecodeError> {
        macro_rules! parse {
            ($variant:ident) => {{
                let text = std::str::from_utf8(&raw)?;
                text.parse()
                    .map(Value::$variant)
                    .map_err(|_| DecodeError::Parse { oid: type_oid })
            }};
        }

        match type_oid {
            oid::BOOL => match &raw[..] {
                b"t" | b"true" | b"on" | b"1" => Ok(Value::Bool(true)),
                b"f" | b"false" | b"off" | b"0" => Ok(Value::Bool(false)),
                _ => Err(DecodeError::Parse { oid: type_oid }),
            },
            oid::INT2 => parse!(Int2),
            oid::INT4 => parse!(Int4),
            oid::INT8 | oid::OID => parse!(Int8),
            oid::FLOAT4 => parse!(Float4),
            oid::FLOAT8 => parse!(Float8),
            oid::BYTEA => {
                let text = std::str::from_utf8(&raw)?;
                let Some(hex) = text.strip_prefix("\\x") else {
                    return Err(DecodeError::Parse { oid: type_oid });
                };
                let mut out = Vec::with_capacity(hex.len() / 2);
                let mut chars = hex.as_bytes().chunks_exact(2);
                for pair in &mut chars {
                    let pair = std::str::from_utf8(pair)?;
                    let byte = u8::from_str_radix(pair, 16)
                        .map_err(|_| DecodeError::Parse { oid: type_oid })?;
                    out.push(byte);
                }
                if !chars.remainder().is_empty() {
                    return Err(DecodeError::Parse { oid: type_oid });
                }
                Ok(Value::Bytes(out.into()))
            }
            oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::CHAR | oid::UNKNOWN => {
                Ok(Value::Text(ByteStr::from_utf8(raw).map_err(DecodeError::NonUtf8)?))
            }
            // unknown oid: hand the raw bytes back as a string
            _ => Ok(Value::Text(ByteStr::from_utf8_lossy(raw))),
        }
    }

    fn decode_binary(type_oid: Oid, mut raw: Bytes) -> Result<Value, DecodeError> {
        macro_rules! fixed {
            ($len:literal, $get:ident, $variant:ident) => {{
                if raw.len() != $len {
                    return Err(DecodeError::Length { oid: type_oid, len: raw.len() });
                }
                Ok(Value::$variant(raw.$get()))
            }};
        }

        match type_oid {
            oid::BOOL => {
                if raw.len() != 1 {
                    return Err(DecodeError::Length { oid: type_oid, len: raw.len() });
                }
                Ok(Value::Bool(raw.get_u8() != 0))
            }
            oid::INT2 => fixed!(2, get_i16, Int2),
            oid::INT4 => fixed!(4, get_i32, Int4),
            oid::INT8 => fixed!(8, get_i64, Int8),
            oid::OID => {
                if raw.len() != 4 {
                    return Err(DecodeError::Length { oid: type_oid, len: raw.len() });
                }
                Ok(Value::Int8(raw.get_u32() as i64))
            }
            oid::FLOAT4 => fixed!(4, get_f32, Float4),
            oid::FLOAT8 => fixed!(8, get_f64, Float8),
            oid::BYTEA => Ok(Value::Bytes(raw)),
            oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::CHAR | oid::UNKNOWN => {
                Ok(Value::Text(ByteStr::from_utf8(raw).map_err(DecodeError::NonUtf8)?))
            }
            _ => Ok(Value::Text(ByteStr::from_utf8_lossy(raw))),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => v.fmt(f),
            Value::Int2(v) => v.fmt(f),
            Value::Int4(v) => v.fmt(f),
            Value::Int8(v) => v.fmt(f),
            Value::Float4(v) => v.fmt(f),
            Value::Float8(v) => v.fmt(f),
            Value::Text(v) => v.fmt(f),
            Value::Bytes(v) => write!(f, "{} bytes", v.len()),
        }
    }
}

macro_rules! from {
    ($($ty:ty => $variant:ident,)*) => {$(
        impl From<$ty> for Value {
            fn from(value: $ty) -> Value {
                Value::$variant(value)
            }
        }
    )*};
}

from! {
    bool => Bool,
    i16 => Int2,
    i32 => Int4,
    i64 => Int8,
    f32 => Float4,
    f64 => Float8,
    ByteStr => Text,
    Bytes => Bytes,
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::Text(ByteStr::copy_from_str(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Value {
        Value::Text(value.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Value {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn binary_round_trip() {
        for value in [
            Value::Bool(true),
            Value::Int2(-7),
            Value::Int4(42),
            Value::Int8(1 << 40),
            Value::Float8(2.5),
            Value::Text("hello".into()),
        ] {
            let encoded = value.encode(Format::Binary);
            let decoded = Value::decode(value.oid(), Format::Binary, encoded.bytes).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn text_decode_int() {
        let v = Value::decode(oid::INT4, Format::Text, Some(Bytes::from_static(b"42"))).unwrap();
        assert_eq!(v, Value::Int4(42));
    }

    #[test]
    fn text_decode_bytea_hex() {
        let v = Value::decode(oid::BYTEA, Format::Text, Some(Bytes::from_static(b"\\xdeadbeef")))
            .unwrap();
        assert_eq!(v, Value::Bytes(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef])));
    }

    #[test]
    fn null_decodes_regardless_of_oid() {
        assert_eq!(Value::decode(oid::INT4, Format::Binary, None).unwrap(), Value::Null);
    }

    #[test]
    fn unknown_oid_falls_back_to_string() {
        let v = Value::decode(600/* point */, Format::Text, Some(Bytes::from_static(b"(1,2)")))
            .unwrap();
        assert_eq!(v, Value::Text("(1,2)".into()));
    }

    #[test]
    fn wrong_binary_length_is_error() {
        assert!(Value::decode(oid::INT4, Format::Binary, Some(Bytes::from_static(b"ab"))).is_err());
    }
}
