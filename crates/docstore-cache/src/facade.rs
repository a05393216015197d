//! Cached read path over the storage adapter.
//!
//! Reads go through the query cache; writes go to the adapter and then
//! invalidate the affected table's namespace.

use std::sync::Arc;

use docstore_engine::Filter;
use docstore_storage::{RemovalCounts, SearchHit, StorageAdapter};
use docstore_types::{tables, Chunk, CodeBlock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::cache::{CacheStats, QueryCache};
use crate::error::CacheError;
use crate::key::CacheQuery;

pub struct CachedStore {
    store: Arc<StorageAdapter>,
    cache: QueryCache<Value>,
}

impl CachedStore {
    pub fn new(store: Arc<StorageAdapter>, cache: QueryCache<Value>) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &Arc<StorageAdapter> {
        &self.store
    }

    pub fn cache(&self) -> &QueryCache<Value> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    async fn cached<T, F, Fut>(&self, query: CacheQuery, load: F) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, CacheError>>,
    {
        let generation = self.cache.generation(query.namespace());
        if let Some(value) = self.cache.get(&query).await {
            return Ok(serde_json::from_value(value)?);
        }
        let result = load().await?;
        self.cache
            .set_if_current(&query, serde_json::to_value(&result)?, generation)
            .await;
        Ok(result)
    }

    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit<Chunk>>, CacheError> {
        let query = CacheQuery::new(tables::CHUNKS, "search")
            .param("vector", vector.to_vec())
            .param("limit", limit)
            .param("filter", filter.map(|f| f.to_string()));
        self.cached(query, || async {
            Ok(self.store.search(vector, limit, filter).await?)
        })
        .await
    }

    pub async fn search_code_blocks(
        &self,
        vector: &[f32],
        limit: usize,
        language: Option<&str>,
    ) -> Result<Vec<SearchHit<CodeBlock>>, CacheError> {
        let query = CacheQuery::new(tables::CODE_BLOCKS, "search")
            .param("vector", vector.to_vec())
            .param("limit", limit)
            .param("language", language.map(docstore_types::normalize_language));
        self.cached(query, || async {
            Ok(self.store.search_code_blocks(vector, limit, language).await?)
        })
        .await
    }

    pub async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>, CacheError> {
        let query = CacheQuery::new(tables::CHUNKS, "get").param("id", id);
        self.cached(query, || async { Ok(self.store.get_chunk(id).await?) })
            .await
    }

    pub async fn add_chunks(&self, chunks: Vec<Chunk>) -> Result<usize, CacheError> {
        let written = self.store.add_chunks(chunks).await?;
        if written > 0 {
            self.cache
                .invalidate_pattern(&CacheQuery::namespace_pattern(tables::CHUNKS))
                .await;
        }
        Ok(written)
    }

    pub async fn add_code_blocks(&self, blocks: Vec<CodeBlock>) -> Result<usize, CacheError> {
        let written = self.store.add_code_blocks(blocks).await?;
        if written > 0 {
            self.cache
                .invalidate_pattern(&CacheQuery::namespace_pattern(tables::CODE_BLOCKS))
                .await;
        }
        Ok(written)
    }

    pub async fn remove_by_document(&self, document_id: &str) -> Result<RemovalCounts, CacheError> {
        let removed = self.store.remove_by_document(document_id).await?;
        if removed.chunks > 0 {
            self.cache
                .invalidate_pattern(&CacheQuery::namespace_pattern(tables::CHUNKS))
                .await;
        }
        if removed.code_blocks > 0 {
            self.cache
                .invalidate_pattern(&CacheQuery::namespace_pattern(tables::CODE_BLOCKS))
                .await;
        }
        Ok(removed)
    }

    pub async fn close(&self) -> Result<(), CacheError> {
        self.cache.close().await;
        self.store.close().await?;
        Ok(())
    }
}
