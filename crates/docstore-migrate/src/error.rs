//! Migration error types.

use std::path::PathBuf;

use docstore_storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// A destination write kept conflicting past the retry limit
    #[error("{operation} still conflicting after {attempts} attempts")]
    WriteConflict { operation: String, attempts: u32 },

    #[error("Migration source not found: {0}")]
    SourceNotFound(PathBuf),

    /// Post-migration counts disagree; destination data is left in place
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid migration options: {0}")]
    InvalidOptions(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
