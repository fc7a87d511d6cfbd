//! Error types for the exchange library.

use thiserror::Error;

/// Main error type for export/import operations.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Mapping description malformed, unknown alias reference, empty structure.
    #[error("Model error: {0}")]
    Model(String),

    /// Introspection found an unknown table, or a relation used by DDL
    /// generation is incomplete.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Business-key resolution failure, empty required extra value, or a
    /// write failure during an import run.
    #[error("Import error: {0}")]
    Import(String),

    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Driver error wrapped with the failing statement and its parameters.
    #[error("Database error: {message}\n  Statement: {statement}\n  Parameters: {params}")]
    Db {
        message: String,
        statement: String,
        params: String,
    },

    /// Connection-level driver error (before any statement ran).
    #[error("Database connection error: {0}")]
    Driver(#[from] postgres::Error),

    /// IO error (binary folder, file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ExchangeError {
    /// Create a Model error.
    pub fn model(message: impl Into<String>) -> Self {
        ExchangeError::Model(message.into())
    }

    /// Create a Schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        ExchangeError::Schema(message.into())
    }

    /// Create an Import error.
    pub fn import(message: impl Into<String>) -> Self {
        ExchangeError::Import(message.into())
    }

    /// Create a Db error carrying the failing statement and parameter values.
    pub fn db(
        message: impl Into<String>,
        statement: impl Into<String>,
        params: impl Into<String>,
    ) -> Self {
        ExchangeError::Db {
            message: message.into(),
            statement: statement.into(),
            params: params.into(),
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            ExchangeError::Config(_) | ExchangeError::Yaml(_) => 1,
            ExchangeError::Model(_) | ExchangeError::Json(_) => 2,
            ExchangeError::Schema(_) => 3,
            ExchangeError::Import(_) => 4,
            ExchangeError::Db { .. } => 5,
            ExchangeError::Driver(_) => 6,
            ExchangeError::Io(_) => 7,
        }
    }
}

/// Result type alias for exchange operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_error_carries_statement_and_params() {
        let err = ExchangeError::db("boom", "select 1", "id: 42");
        let text = err.to_string();
        assert!(text.contains("boom"));
        assert!(text.contains("select 1"));
        assert!(text.contains("id: 42"));
    }

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        assert_eq!(ExchangeError::model("x").exit_code(), 2);
        assert_eq!(ExchangeError::schema("x").exit_code(), 3);
        assert_eq!(ExchangeError::import("x").exit_code(), 4);
        assert_eq!(ExchangeError::Config("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_format_detailed_includes_io_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = ExchangeError::Io(io);
        assert!(err.format_detailed().starts_with("Error: IO error"));
    }
}
