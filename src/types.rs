//! Postgres type registry.
//!
//! The registry starts from a builtin set of well-known types and is
//! refreshed from `pg_type` when the connection bootstraps.
use std::collections::HashMap;

use crate::{common::ByteStr, row::QueryResult, value::Value};

/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

/// Well-known type oids.
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const CHAR: Oid = 18;
    pub const NAME: Oid = 19;
    /// `int8` ~18 digit integer, 8-byte storage
    pub const INT8: Oid = 20;
    /// `int2` -32 thousand to 32 thousand, 2-byte storage
    pub const INT2: Oid = 21;
    /// `int4` -2 billion to 2 billion integer, 4-byte storage
    pub const INT4: Oid = 23;
    /// `text` variable-length string, no limit specified
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    /// `float4` single-precision floating point number, 4-byte storage
    pub const FLOAT4: Oid = 700;
    /// `float8` double-precision floating point number, 8-byte storage
    pub const FLOAT8: Oid = 701;
    pub const UNKNOWN: Oid = 705;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
}

/// Registry of type oids known to this connection.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    by_oid: HashMap<Oid, ByteStr>,
}

impl TypeRegistry {
    /// The query used to refresh the registry at connection bootstrap.
    pub(crate) const BOOTSTRAP_SQL: &'static str =
        "SELECT t.oid, t.typname FROM pg_type t";

    /// Registry preloaded with the builtin types only.
    pub fn builtin() -> TypeRegistry {
        let mut by_oid = HashMap::new();

        macro_rules! preload {
            ($($oid:expr => $name:literal,)*) => {$(
                by_oid.insert($oid, ByteStr::from_static($name));
            )*};
        }

        preload! {
            oid::BOOL => "bool",
            oid::BYTEA => "bytea",
            oid::CHAR => "char",
            oid::NAME => "name",
            oid::INT8 => "int8",
            oid::INT2 => "int2",
            oid::INT4 => "int4",
            oid::TEXT => "text",
            oid::OID => "oid",
            oid::FLOAT4 => "float4",
            oid::FLOAT8 => "float8",
            oid::UNKNOWN => "unknown",
            oid::BPCHAR => "bpchar",
            oid::VARCHAR => "varchar",
        }

        TypeRegistry { by_oid }
    }

    /// Build a registry from the bootstrap query result.
    ///
    /// Rows that do not look like `(oid, typname)` are skipped.
    pub(crate) fn from_result(result: &QueryResult) -> TypeRegistry {
        let mut me = TypeRegistry::builtin();
        for row in &result.rows {
            let (Some(Value::Int8(oid)), Some(Value::Text(name))) = (row.first(), row.get(1))
            else {
                continue;
            };
            let Ok(oid) = Oid::try_from(*oid) else {
                continue;
            };
            me.by_oid.insert(oid, name.clone());
        }
        me
    }

    /// Type name for `oid`, if known.
    pub fn name(&self, oid: Oid) -> Option<&str> {
        self.by_oid.get(&oid).map(ByteStr::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_oid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_oid.is_empty()
    }
}
