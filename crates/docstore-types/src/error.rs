//! Error types shared across the docstore crates.

use thiserror::Error;

/// Errors raised while loading settings or validating records.
#[derive(Debug, Error)]
pub enum DocstoreError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record violates one of its invariants
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}
