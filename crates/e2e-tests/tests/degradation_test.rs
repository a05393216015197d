//! Reads and writes keep working when the shared cache tier or the vector
//! index is unavailable.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use docstore_cache::HttpSharedCache;
use docstore_storage::{
    AdapterConfig, IndexTuning, PoolConfig, StoreError, TableKind,
};
use e2e_tests::{create_test_chunks, TestHarness, DIMENSION};

/// Nothing listens on the discard port; every L2 call fails fast.
const DEAD_ENDPOINT: &str = "http://127.0.0.1:9";

#[tokio::test]
async fn test_l2_down_falls_back_to_l1() {
    let harness = TestHarness::new().await;
    let l2 = HttpSharedCache::new(DEAD_ENDPOINT, Duration::from_millis(200)).unwrap();
    let cached = harness.cached_with_shared(Arc::new(l2));

    let chunks = create_test_chunks(2, 3, DIMENSION, 21);
    assert_eq!(cached.add_chunks(chunks.clone()).await.unwrap(), 6);

    let first = cached.search(&chunks[2].embedding, 3, None).await.unwrap();
    let second = cached.search(&chunks[2].embedding, 3, None).await.unwrap();
    assert_eq!(first[0].record.id, chunks[2].id);
    assert_eq!(first, second);

    let stats = cached.cache_stats();
    assert!(stats.l2_enabled);
    assert_eq!(stats.l1_hits, 1);
    assert!(stats.l2_errors > 0);

    let removed = cached.remove_by_document("doc-0").await.unwrap();
    assert_eq!(removed.chunks, 3);
    cached.close().await.unwrap();
}

/// A vector index build that cannot finish in time leaves exhaustive
/// search in place.
#[tokio::test]
async fn test_index_timeout_keeps_search_correct() {
    let config = AdapterConfig {
        embedding_dimension: DIMENSION,
        pool: PoolConfig::default(),
        index: IndexTuning {
            min_trainable_rows: 256,
            build_timeout: Duration::from_nanos(1),
            ..IndexTuning::default()
        },
    };
    let harness = TestHarness::with_config(config).await;
    let chunks = create_test_chunks(30, 10, DIMENSION, 33);
    assert_eq!(harness.store.add_chunks(chunks.clone()).await.unwrap(), 300);

    for target in [&chunks[0], &chunks[170], &chunks[299]] {
        let hits = harness.store.search(&target.embedding, 3, None).await.unwrap();
        assert_eq!(hits[0].record.id, target.id);
    }
    assert_eq!(harness.store.count(TableKind::Chunks).await.unwrap(), 300);
}

#[tokio::test]
async fn test_pool_exhaustion_is_reported() {
    let config = AdapterConfig {
        embedding_dimension: DIMENSION,
        pool: PoolConfig {
            max_size: 1,
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_millis(50),
        },
        index: IndexTuning::default(),
    };
    let harness = TestHarness::with_config(config).await;

    let held = harness.store.pool().acquire().await.unwrap();
    let err = harness.store.count(TableKind::Chunks).await.unwrap_err();
    assert!(matches!(err, StoreError::ConnectionExhausted { .. }));

    drop(held);
    assert_eq!(harness.store.count(TableKind::Chunks).await.unwrap(), 0);
}

#[tokio::test]
async fn test_wrong_dimension_rejected() {
    let harness = TestHarness::new().await;
    let mut chunks = create_test_chunks(1, 2, DIMENSION, 1);
    chunks[1].embedding.truncate(DIMENSION / 2);

    assert!(harness.store.add_chunks(chunks).await.is_err());
    assert_eq!(harness.store.count(TableKind::Chunks).await.unwrap(), 0);

    let good = create_test_chunks(1, 1, DIMENSION, 2);
    harness.store.add_chunks(good).await.unwrap();
    assert!(harness.store.search(&[0.5; 3], 1, None).await.is_err());
}
