//! Database gateway: the one collaborator interface the engine requires.
//!
//! Everything the exporter, importer and structure catalog need from the
//! database fits in four operations: execute a statement with named
//! parameters, and control a transaction. Statements are built by the engine
//! from catalog-introspected identifiers; all values bind as parameters.

mod postgres;

#[cfg(test)]
pub(crate) mod mock;

pub use self::postgres::PgGateway;

use indexmap::IndexMap;

use crate::core::Value;
use crate::error::Result;

/// One result row: ordered column name → value.
pub type SqlRow = IndexMap<String, Value>;

/// Blocking database access.
///
/// Named parameters use the `:name` notation inside statement text;
/// implementations translate them to their driver's placeholder syntax.
/// Driver failures must come back wrapped with the failing statement text
/// and parameter values attached, never raw.
pub trait Gateway {
    /// Execute a statement and return its rows (empty for writes without
    /// a RETURNING clause).
    fn execute(&mut self, sql: &str, params: &[(&str, Value)]) -> Result<Vec<SqlRow>>;

    /// Open a transaction.
    fn begin_transaction(&mut self) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> Result<()>;
}

/// Render parameter values for error diagnostics.
pub(crate) fn display_params(params: &[(&str, Value)]) -> String {
    params
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value.to_plain_string()))
        .collect::<Vec<_>>()
        .join(", ")
}
