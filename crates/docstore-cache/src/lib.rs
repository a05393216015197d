//! # docstore-cache
//!
//! Two-tier cache in front of repeated docstore read queries.
//!
//! - L1: bounded in-process FIFO with fixed per-entry expiry
//! - L2: optional shared tier over HTTP, best-effort
//!
//! The cache works with L2 absent or down; shared-tier failures only show
//! up in [`CacheStats::l2_errors`].

pub mod cache;
pub mod error;
pub mod facade;
pub mod key;
pub mod memory;
pub mod shared;

pub use cache::{CacheConfig, CacheStats, QueryCache};
pub use error::CacheError;
pub use facade::CachedStore;
pub use key::{pattern_matches, CacheQuery};
pub use memory::{Lookup, MemoryCache};
pub use shared::{HttpSharedCache, SharedCache, TTL_HEADER};
