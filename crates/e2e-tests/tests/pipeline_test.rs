//! End-to-end add, search and delete through the adapter and the cached
//! facade.

use pretty_assertions::assert_eq;

use docstore_storage::{StorageAdapter, TableKind};
use docstore_types::CodeBlock;
use e2e_tests::{adapter_config, create_test_chunks, TestHarness, DIMENSION};

/// Five documents of three chunks; the embedding of chunk 7 finds chunk 7
/// first, and deleting its document removes it from every later search.
#[tokio::test]
async fn test_search_then_delete_document() {
    let harness = TestHarness::new().await;
    let chunks = create_test_chunks(5, 3, DIMENSION, 7);
    assert_eq!(harness.store.add_chunks(chunks.clone()).await.unwrap(), 15);

    let target = &chunks[7];
    let hits = harness.store.search(&target.embedding, 5, None).await.unwrap();
    assert_eq!(hits.len(), 5);
    assert_eq!(hits[0].record.id, target.id);
    assert!(hits[0].score > 0.999);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    let removed = harness
        .store
        .remove_by_document(&target.document_id)
        .await
        .unwrap();
    assert_eq!(removed.chunks, 3);

    let hits = harness.store.search(&target.embedding, 5, None).await.unwrap();
    assert!(hits.iter().all(|h| h.record.document_id != target.document_id));
    assert_eq!(harness.store.count(TableKind::Chunks).await.unwrap(), 12);
}

/// The same scenario through the cache: a cached result never outlives the
/// delete that invalidates it.
#[tokio::test]
async fn test_cached_search_invalidated_by_delete() {
    let harness = TestHarness::new().await;
    let cached = harness.cached();
    let chunks = create_test_chunks(5, 3, DIMENSION, 11);
    cached.add_chunks(chunks.clone()).await.unwrap();

    let target = &chunks[7];
    let first = cached.search(&target.embedding, 5, None).await.unwrap();
    let again = cached.search(&target.embedding, 5, None).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(cached.cache_stats().l1_hits, 1);

    cached.remove_by_document(&target.document_id).await.unwrap();
    let after = cached.search(&target.embedding, 5, None).await.unwrap();
    assert!(after.iter().all(|h| h.record.document_id != target.document_id));

    let fetched = cached.get_chunk(&chunks[0].id).await.unwrap();
    assert_eq!(fetched.map(|c| c.id), Some(chunks[0].id.clone()));
    assert_eq!(cached.get_chunk(&target.id).await.unwrap(), None);
}

#[tokio::test]
async fn test_code_blocks_by_language() {
    let harness = TestHarness::new().await;
    let chunks = create_test_chunks(1, 3, DIMENSION, 3);
    let blocks = vec![
        CodeBlock::new("doc-0", 0, "rs", "fn main() {}", chunks[0].embedding.clone()),
        CodeBlock::new("doc-0", 1, "py", "print('hi')", chunks[1].embedding.clone()),
        CodeBlock::new("doc-0", 2, "sh", "  \n", chunks[2].embedding.clone()),
    ];
    assert_eq!(harness.store.add_code_blocks(blocks).await.unwrap(), 2);

    let hits = harness
        .store
        .search_code_blocks(&chunks[0].embedding, 5, Some("python"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.language, "python");

    let stored = harness.store.get_code_blocks_by_document("doc-0").await.unwrap();
    let languages: Vec<&str> = stored.iter().map(|b| b.language.as_str()).collect();
    assert_eq!(languages, vec!["rust", "python"]);
}

#[tokio::test]
async fn test_reopen_keeps_rows_searchable() {
    let temp = tempfile::TempDir::new().unwrap();
    let chunks = create_test_chunks(3, 3, DIMENSION, 5);
    {
        let store = StorageAdapter::open(temp.path(), adapter_config(DIMENSION))
            .await
            .unwrap();
        store.add_chunks(chunks.clone()).await.unwrap();
        store.close().await.unwrap();
    }

    let store = StorageAdapter::open(temp.path(), adapter_config(DIMENSION))
            .await
            .unwrap();
    store.initialize().await.unwrap();
    assert_eq!(store.count(TableKind::Chunks).await.unwrap(), 9);
    let hits = store.search(&chunks[4].embedding, 1, None).await.unwrap();
    assert_eq!(hits[0].record.id, chunks[4].id);
}
