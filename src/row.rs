//! Query result shape.
use crate::{common::ByteStr, postgres::Format, types::Oid, value::Value};

/// Description of one result column, kept while rows accumulate.
#[derive(Debug, Clone)]
pub struct ColumnDesc {
    pub name: ByteStr,
    pub oid: Oid,
    /// The transfer format the values actually arrive in.
    pub format: Format,
}

/// The reply to a completed query.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Result column names; empty for commands that return no rows
    /// (`CREATE`, `DROP`, ...).
    pub columns: Vec<ByteStr>,
    /// Decoded rows in arrival order.
    pub rows: Vec<Vec<Value>>,
    /// The command tag, e.g. `SELECT 1` or `CREATE TABLE`.
    pub command_tag: ByteStr,
    /// Row count parsed out of the command tag; for `INSERT`/`UPDATE`/...
    /// this is the affected count even though no rows were returned.
    pub rows_affected: u64,
}

impl QueryResult {
    /// Number of rows returned.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

/// Decode the affected row count from a command tag.
///
/// For an INSERT the tag is `INSERT oid rows`; oid is always 0 since OID
/// system columns are not supported anymore. For the other row-reporting
/// commands the count is the second word.
pub(crate) fn rows_affected(tag: &str) -> u64 {
    let mut words = tag.split_whitespace();
    let Some(command) = words.next() else {
        return 0;
    };
    let Some(rows) = words.next() else {
        return 0;
    };
    match command {
        "INSERT" => words.next().unwrap_or_default(),
        "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "FETCH" | "MOVE" | "COPY" => rows,
        _ => return 0,
    }
    .parse()
    .unwrap_or_default()
}
