//! # docstore-storage
//!
//! Vector-store management over the embedded docstore engine.
//!
//! ## Components
//! - [`pool`]: bounded, recycling pool of engine handles
//! - [`index_config`]: vector index tuning from row count and width
//! - [`bounded`]: deadline-bounded operations that outlive their caller
//! - [`adapter`]: chunk and code-block storage with lazy table creation

pub mod adapter;
pub mod bounded;
pub mod engine_manager;
pub mod error;
pub mod index_config;
pub mod pool;

pub use adapter::{
    distance_to_score, from_row, to_row, AdapterConfig, AdapterStats, IndexOutcome,
    RemovalCounts, RowReader, SearchHit, StorageAdapter, TableKind, TableState, TableStats,
    EMBEDDING_COLUMN,
};
pub use bounded::run_bounded;
pub use engine_manager::{EngineConnection, EngineManager};
pub use error::StoreError;
pub use index_config::{IndexDecision, IndexTuning};
pub use pool::{ConnectionManager, Pool, PoolConfig, PoolStats, PooledConnection};
