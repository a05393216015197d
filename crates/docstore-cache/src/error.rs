//! Cache error types.

use docstore_storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Shared tier unreachable or returned an error. Absorbed by
    /// `QueryCache`; only surfaced by `SharedCache` implementations.
    #[error("Cache tier unavailable: {0}")]
    TierUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from the store behind a cached facade
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::TierUnavailable(err.to_string())
    }
}
