//! Storage layer error types.

use std::time::Duration;

use docstore_engine::EngineError;
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Engine operation failed
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// No pooled handle became free within the wait window
    #[error("Connection pool exhausted after waiting {waited:?}")]
    ConnectionExhausted { waited: Duration },

    /// Pool was shut down
    #[error("Connection pool is closed")]
    PoolClosed,

    /// A bounded operation missed its deadline; the work itself may still
    /// be running
    #[error("{operation} timed out after {after:?}")]
    TimedOut { operation: String, after: Duration },

    /// A spawned task panicked or was aborted
    #[error("Background task failed: {0}")]
    TaskFailed(String),

    /// Record failed validation before reaching the engine
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Invalid component configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True for transient engine contention that a caller may retry.
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, StoreError::Engine(e) if e.is_write_conflict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_conflict_classification() {
        let conflict = StoreError::from(EngineError::WriteConflict("busy".into()));
        assert!(conflict.is_write_conflict());
        assert!(!StoreError::PoolClosed.is_write_conflict());
        assert!(!StoreError::from(EngineError::TableNotFound("t".into())).is_write_conflict());
    }

    #[test]
    fn test_timed_out_display() {
        let err = StoreError::TimedOut {
            operation: "vector index build".into(),
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "vector index build timed out after 1.5s");
    }
}
