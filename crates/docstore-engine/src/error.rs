//! Engine error types.

use thiserror::Error;

/// Errors that can occur inside the table engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Opening the database failed
    #[error("Cannot open store at {uri}: {cause}")]
    Connect { uri: String, cause: String },

    /// LanceDB rejected an operation on a table
    #[error("LanceDB error on {table}: {cause}")]
    Lance { table: String, cause: String },

    /// Arrow batch could not be built or read
    #[error("Arrow error on {table}: {cause}")]
    Arrow { table: String, cause: String },

    /// Transient contention; the write was not applied and may be retried
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    /// Table does not exist
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Table already exists
    #[error("Table already exists: {0}")]
    TableExists(String),

    /// Row does not fit the table schema
    #[error("Schema mismatch in table {table}: {reason}")]
    SchemaMismatch { table: String, reason: String },

    /// Caller passed an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Whether retrying the same write may succeed.
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, EngineError::WriteConflict(_))
    }

    pub(crate) fn schema(table: &str, reason: impl Into<String>) -> Self {
        EngineError::SchemaMismatch {
            table: table.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap a LanceDB error. Commit conflicts between concurrent writers
    /// become `WriteConflict` so callers can retry them.
    pub(crate) fn lance(table: &str, err: impl std::fmt::Display) -> Self {
        let cause = err.to_string();
        if cause.to_ascii_lowercase().contains("conflict") {
            EngineError::WriteConflict(format!("{}: {}", table, cause))
        } else {
            EngineError::Lance {
                table: table.to_string(),
                cause,
            }
        }
    }

    pub(crate) fn arrow(table: &str, err: arrow::error::ArrowError) -> Self {
        EngineError::Arrow {
            table: table.to_string(),
            cause: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
