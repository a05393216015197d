//! End-to-end test infrastructure for docstore.
//!
//! Provides a shared TestHarness and helpers for scenarios that cross the
//! adapter, cache and migration crates.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use docstore_cache::{CacheConfig, CachedStore, QueryCache, SharedCache};
use docstore_storage::{AdapterConfig, IndexTuning, PoolConfig, StorageAdapter};
use docstore_types::Chunk;

/// Embedding width used by the end-to-end scenarios
pub const DIMENSION: usize = 128;

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub store: Arc<StorageAdapter>,
}

impl TestHarness {
    /// Open an adapter over a fresh temp directory.
    pub async fn new() -> Self {
        Self::with_config(adapter_config(DIMENSION)).await
    }

    pub async fn with_config(config: AdapterConfig) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            StorageAdapter::open(temp_dir.path(), config)
                .await
                .expect("Failed to open test store"),
        );
        Self {
            _temp_dir: temp_dir,
            store,
        }
    }

    /// A cached facade over the harness store, L1 only.
    pub fn cached(&self) -> CachedStore {
        let cache = QueryCache::new(cache_config()).expect("Invalid cache config");
        CachedStore::new(Arc::clone(&self.store), cache)
    }

    /// A cached facade with `l2` as the shared tier.
    pub fn cached_with_shared(&self, l2: Arc<dyn SharedCache>) -> CachedStore {
        let cache = QueryCache::with_shared(cache_config(), l2).expect("Invalid cache config");
        CachedStore::new(Arc::clone(&self.store), cache)
    }
}

pub fn adapter_config(dimension: usize) -> AdapterConfig {
    AdapterConfig {
        embedding_dimension: dimension,
        pool: PoolConfig::default(),
        index: IndexTuning::default(),
    }
}

pub fn cache_config() -> CacheConfig {
    CacheConfig {
        l1_max_entries: 256,
        l1_ttl: Duration::from_secs(60),
        l2_ttl: Duration::from_secs(300),
        l2_timeout: Duration::from_millis(200),
    }
}

/// Random unit-length vector.
pub fn random_embedding(rng: &mut StdRng, dimension: usize) -> Vec<f32> {
    let raw: Vec<f32> = (0..dimension)
        .map(|_| rng.random::<f32>() * 2.0 - 1.0)
        .collect();
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt().max(f32::EPSILON);
    raw.into_iter().map(|x| x / norm).collect()
}

/// `documents` documents of `chunks_per_document` chunks each, ids `doc-{d}`
/// and global chunk numbering in the content (`chunk {n}`).
pub fn create_test_chunks(
    documents: usize,
    chunks_per_document: usize,
    dimension: usize,
    seed: u64,
) -> Vec<Chunk> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut chunks = Vec::with_capacity(documents * chunks_per_document);
    for d in 0..documents {
        let mut offset = 0;
        for i in 0..chunks_per_document {
            let n = d * chunks_per_document + i;
            let content = format!("chunk {} of document {}", n, d);
            let chunk = Chunk::new(
                format!("doc-{}", d),
                i as u32,
                offset,
                content,
                random_embedding(&mut rng, dimension),
            );
            offset = chunk.end_offset;
            chunks.push(chunk);
        }
    }
    chunks
}
