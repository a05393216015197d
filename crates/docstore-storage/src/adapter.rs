//! Storage adapter over the pooled engine.
//!
//! Owns the `chunks` and `code_blocks` tables. A table that has not been
//! created yet is a normal state: reads against it return empty results and
//! deletes are no-ops. The first write creates the table from its batch,
//! with the embedding column fixed at the configured width.
//!
//! Every engine call runs under a pool lease, index builds included, so the
//! pool size bounds concurrent engine work. Vector index builds are bounded
//! by the configured timeout. A build that fails or times out is logged and
//! absorbed; exhaustive search stays correct without it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use docstore_engine::{
    Engine, EngineError, Filter, Row, RowStream, ScanOptions, TableSchema, VectorIndexBuild,
};
use docstore_types::{normalize_language, Chunk, CodeBlock, Settings};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bounded::run_bounded;
use crate::engine_manager::EngineManager;
use crate::error::StoreError;
use crate::index_config::{IndexDecision, IndexTuning};
use crate::pool::{Pool, PoolConfig, PoolStats, PooledConnection};

type Lease = PooledConnection<EngineManager>;

/// Column holding embeddings in both adapter tables
pub const EMBEDDING_COLUMN: &str = "embedding";

/// Adapter configuration, built once and passed in at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Width every non-empty embedding must have
    pub embedding_dimension: usize,
    pub pool: PoolConfig,
    pub index: IndexTuning,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for AdapterConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            embedding_dimension: settings.storage.embedding_dimension,
            pool: PoolConfig::from(&settings.pool),
            index: IndexTuning::from(&settings.index),
        }
    }
}

impl AdapterConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.embedding_dimension == 0 {
            return Err(StoreError::Config("embedding_dimension must be > 0".into()));
        }
        self.pool.validate()?;
        self.index.validate()
    }
}

/// Logical tables owned by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Chunks,
    CodeBlocks,
}

impl TableKind {
    pub const ALL: [TableKind; 2] = [TableKind::Chunks, TableKind::CodeBlocks];

    pub fn table_name(&self) -> &'static str {
        match self {
            TableKind::Chunks => docstore_types::tables::CHUNKS,
            TableKind::CodeBlocks => docstore_types::tables::CODE_BLOCKS,
        }
    }

    pub fn from_table_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.table_name() == name)
    }
}

/// Lifecycle of one adapter table
#[derive(Debug, Clone, PartialEq)]
pub enum TableState {
    Unopened,
    Created { schema: TableSchema },
}

/// Result of an index build attempt. Only `Built` changes search behaviour.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOutcome {
    Built { rows_indexed: usize },
    /// Below the trainable row count
    Skipped { rows: usize, required: usize },
    /// Table has no embedded rows yet
    NoVectors,
    /// A previous build of the same table is still running
    InProgress,
    TimedOut,
    Failed(String),
}

/// A search result with its similarity score in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct SearchHit<T> {
    pub record: T,
    pub distance: f32,
    pub score: f32,
}

/// Map cosine distance in [0, 2] to similarity in [0, 1].
pub fn distance_to_score(distance: f32) -> f32 {
    ((2.0 - distance) / 2.0).clamp(0.0, 1.0)
}

/// Rows removed per table by `remove_by_document`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalCounts {
    pub chunks: usize,
    pub code_blocks: usize,
}

impl RemovalCounts {
    pub fn total(&self) -> usize {
        self.chunks + self.code_blocks
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableStats {
    pub kind: TableKind,
    pub created: bool,
    pub rows: usize,
    pub vector_index: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterStats {
    pub tables: Vec<TableStats>,
    pub pool: PoolStats,
}


/// Forward-only reader over one table. Holds its pool lease until dropped.
pub struct RowReader {
    rows: RowStream,
    _lease: Lease,
}

impl RowReader {
    /// Up to `max` rows; empty once the table is exhausted.
    pub async fn next_rows(&mut self, max: usize) -> Result<Vec<Row>, StoreError> {
        Ok(self.rows.next_rows(max).await?)
    }
}

pub struct StorageAdapter {
    pool: Pool<EngineManager>,
    config: AdapterConfig,
    states: RwLock<HashMap<TableKind, TableState>>,
    /// Held while a table is created so racing first writes create it once
    creating: Mutex<()>,
}

impl StorageAdapter {
    /// Open the engine at `path` and wrap it.
    pub async fn open(path: &Path, config: AdapterConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let manager = EngineManager::open(path).await?;
        Self::with_manager(manager, config)
    }

    pub fn with_manager(manager: EngineManager, config: AdapterConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let pool = Pool::new(manager, config.pool)?;
        let states = TableKind::ALL
            .into_iter()
            .map(|kind| (kind, TableState::Unopened))
            .collect();
        Ok(Self {
            pool,
            config,
            states: RwLock::new(states),
            creating: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn pool(&self) -> &Pool<EngineManager> {
        &self.pool
    }

    pub fn table_state(&self, kind: TableKind) -> TableState {
        self.states
            .read()
            .expect("table state lock poisoned")
            .get(&kind)
            .cloned()
            .unwrap_or(TableState::Unopened)
    }

    fn set_state(&self, kind: TableKind, state: TableState) {
        self.states
            .write()
            .expect("table state lock poisoned")
            .insert(kind, state);
    }

    /// Bring the recorded state of `kind` in line with the engine.
    async fn refresh_state(&self, engine: &Engine, kind: TableKind) -> Result<bool, StoreError> {
        let name = kind.table_name();
        if engine.table_exists(name).await? {
            let schema = engine.schema(name).await?;
            self.set_state(kind, TableState::Created { schema });
            Ok(true)
        } else {
            self.set_state(kind, TableState::Unopened);
            Ok(false)
        }
    }

    async fn is_created(&self, engine: &Engine, kind: TableKind) -> Result<bool, StoreError> {
        match self.table_state(kind) {
            TableState::Created { .. } => Ok(true),
            TableState::Unopened => self.refresh_state(engine, kind).await,
        }
    }

    /// Open existing tables and build missing vector indexes where enough
    /// embedded rows exist. Index failures are logged, not returned.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        for kind in TableKind::ALL {
            let conn = self.pool.acquire().await?;
            let name = kind.table_name();
            if !self.refresh_state(conn.engine(), kind).await? {
                debug!(table = name, "Table not created yet");
                continue;
            }
            let rows = conn.engine().count_rows(name, None).await?;
            let indexed = conn
                .engine()
                .indexes(name)
                .await?
                .has_vector_index(EMBEDDING_COLUMN);
            info!(table = name, rows, indexed, "Opened table");
            if !indexed && rows >= self.config.index.min_trainable_rows {
                self.build_with_lease(conn, name, EMBEDDING_COLUMN).await;
            }
        }
        Ok(())
    }

    /// Store chunks. Returns the number written.
    pub async fn add_chunks(&self, chunks: Vec<Chunk>) -> Result<usize, StoreError> {
        let dimension = self.config.embedding_dimension;
        let rows = chunks
            .iter()
            .map(|chunk| {
                chunk
                    .validate(dimension)
                    .map_err(|e| StoreError::InvalidRecord(e.to_string()))?;
                to_row(chunk)
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.add_rows(TableKind::Chunks, rows).await
    }

    /// Store code blocks, dropping empty ones and normalizing languages.
    /// Returns the number written.
    pub async fn add_code_blocks(&self, blocks: Vec<CodeBlock>) -> Result<usize, StoreError> {
        let dimension = self.config.embedding_dimension;
        let mut rows = Vec::with_capacity(blocks.len());
        for mut block in blocks {
            if block.is_empty() {
                debug!(block = %block.id, "Skipping empty code block");
                continue;
            }
            if !block.embedding.is_empty() && block.embedding.len() != dimension {
                return Err(StoreError::InvalidRecord(format!(
                    "code block {} embedding has {} dimensions, expected {}",
                    block.id,
                    block.embedding.len(),
                    dimension
                )));
            }
            block.language = normalize_language(&block.language).to_string();
            rows.push(to_row(&block)?);
        }
        self.add_rows(TableKind::CodeBlocks, rows).await
    }

    async fn add_rows(&self, kind: TableKind, rows: Vec<Row>) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let name = kind.table_name();
        let conn = self.pool.acquire().await?;
        let engine = conn.engine();

        let (written, created) = self
            .append_or_create(engine, name, rows, Some(self.config.embedding_dimension))
            .await?;
        self.refresh_state(engine, kind).await?;

        let embedded = engine
            .count_rows(name, Some(&Filter::not_null(EMBEDDING_COLUMN)))
            .await?;
        let needs_index = embedded >= self.config.index.min_trainable_rows
            && !engine.indexes(name).await?.has_vector_index(EMBEDDING_COLUMN);
        debug!(table = name, rows = written, created, embedded, "Stored rows");
        if needs_index {
            self.build_with_lease(conn, name, EMBEDDING_COLUMN).await;
        }
        Ok(written)
    }

    /// Append to `table`, creating it from this batch when it does not exist.
    /// Returns the rows written and whether this call created the table.
    async fn append_or_create(
        &self,
        engine: &Engine,
        table: &str,
        rows: Vec<Row>,
        vector_width: Option<usize>,
    ) -> Result<(usize, bool), StoreError> {
        if engine.table_exists(table).await? {
            return Ok((engine.add(table, rows).await?, false));
        }
        let _creating = self.creating.lock().await;
        if engine.table_exists(table).await? {
            debug!(table, "Table created concurrently; appending");
            return Ok((engine.add(table, rows).await?, false));
        }

        let mut schema = TableSchema::infer(table, &rows)?;
        if let Some(width) = vector_width {
            schema = schema.with_vector(EMBEDDING_COLUMN, width);
        }
        let count = rows.len();
        match engine.create_table_with(table, schema, rows.clone()).await {
            Ok(_) => Ok((count, true)),
            Err(EngineError::TableExists(_)) => Ok((engine.add(table, rows).await?, false)),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every chunk and code block of a document.
    pub async fn remove_by_document(&self, document_id: &str) -> Result<RemovalCounts, StoreError> {
        let conn = self.pool.acquire().await?;
        let filter = Filter::eq("document_id", document_id);
        let mut counts = RemovalCounts::default();
        for kind in TableKind::ALL {
            if !self.is_created(conn.engine(), kind).await? {
                continue;
            }
            let removed = conn.engine().delete(kind.table_name(), &filter).await?;
            match kind {
                TableKind::Chunks => counts.chunks = removed,
                TableKind::CodeBlocks => counts.code_blocks = removed,
            }
        }
        info!(
            document_id,
            chunks = counts.chunks,
            code_blocks = counts.code_blocks,
            "Removed document rows"
        );
        Ok(counts)
    }

    /// Chunks most similar to `query`, best first.
    pub async fn search(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit<Chunk>>, StoreError> {
        self.search_kind(TableKind::Chunks, query, limit, filter)
            .await
    }

    /// Code blocks most similar to `query`, optionally of one language.
    pub async fn search_code_blocks(
        &self,
        query: &[f32],
        limit: usize,
        language: Option<&str>,
    ) -> Result<Vec<SearchHit<CodeBlock>>, StoreError> {
        let filter = language.map(|lang| Filter::eq("language", normalize_language(lang)));
        self.search_kind(TableKind::CodeBlocks, query, limit, filter.as_ref())
            .await
    }

    async fn search_kind<T: DeserializeOwned>(
        &self,
        kind: TableKind,
        query: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit<T>>, StoreError> {
        let conn = self.pool.acquire().await?;
        if !self.is_created(conn.engine(), kind).await? {
            return Ok(Vec::new());
        }
        let scored = conn
            .engine()
            .vector_search(kind.table_name(), EMBEDDING_COLUMN, query, limit, filter)
            .await?;
        scored
            .into_iter()
            .map(|hit| {
                Ok(SearchHit {
                    record: from_row(hit.row)?,
                    distance: hit.distance,
                    score: distance_to_score(hit.distance),
                })
            })
            .collect()
    }

    /// Point lookup. `None` when absent.
    pub async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>, StoreError> {
        let conn = self.pool.acquire().await?;
        if !self.is_created(conn.engine(), TableKind::Chunks).await? {
            return Ok(None);
        }
        let options = ScanOptions {
            filter: Some(Filter::eq("id", id)),
            limit: Some(1),
        };
        let mut rows = conn
            .engine()
            .scan(TableKind::Chunks.table_name(), &options)
            .await?;
        rows.pop().map(from_row).transpose()
    }

    /// A document's code blocks in block order.
    pub async fn get_code_blocks_by_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<CodeBlock>, StoreError> {
        let conn = self.pool.acquire().await?;
        if !self.is_created(conn.engine(), TableKind::CodeBlocks).await? {
            return Ok(Vec::new());
        }
        let rows = conn
            .engine()
            .scan(
                TableKind::CodeBlocks.table_name(),
                &ScanOptions::filtered(Filter::eq("document_id", document_id)),
            )
            .await?;
        let mut blocks = rows
            .into_iter()
            .map(from_row)
            .collect::<Result<Vec<CodeBlock>, _>>()?;
        blocks.sort_by_key(|block| block.block_index);
        Ok(blocks)
    }

    pub async fn count(&self, kind: TableKind) -> Result<usize, StoreError> {
        let conn = self.pool.acquire().await?;
        if !self.is_created(conn.engine(), kind).await? {
            return Ok(0);
        }
        Ok(conn.engine().count_rows(kind.table_name(), None).await?)
    }

    pub async fn stats(&self) -> Result<AdapterStats, StoreError> {
        let conn = self.pool.acquire().await?;
        let mut tables = Vec::with_capacity(TableKind::ALL.len());
        for kind in TableKind::ALL {
            let created = self.is_created(conn.engine(), kind).await?;
            let (rows, vector_index) = if created {
                let name = kind.table_name();
                (
                    conn.engine().count_rows(name, None).await?,
                    conn.engine()
                        .indexes(name)
                        .await?
                        .has_vector_index(EMBEDDING_COLUMN),
                )
            } else {
                (0, false)
            };
            tables.push(TableStats {
                kind,
                created,
                rows,
                vector_index,
            });
        }
        drop(conn);
        Ok(AdapterStats {
            tables,
            pool: self.pool.stats(),
        })
    }

    /// Shut the pool. Leases still out are destroyed as they come back.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.pool.close();
        info!(path = %self.pool.manager().engine().path().display(), "Storage adapter closed");
        Ok(())
    }

    // Table-level primitives. These address any table by name and are what
    // the migration engine drives.

    pub async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let conn = self.pool.acquire().await?;
        Ok(conn.engine().table_exists(table).await?)
    }

    pub async fn table_names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.pool.acquire().await?;
        Ok(conn.engine().table_names().await?)
    }

    /// Drop a table. Returns false if it did not exist.
    pub async fn drop_table(&self, table: &str) -> Result<bool, StoreError> {
        let conn = self.pool.acquire().await?;
        let dropped = conn.engine().drop_table(table).await?;
        self.sync_named(conn.engine(), table).await?;
        Ok(dropped)
    }

    /// Create a table from its first batch.
    pub async fn create_table_with(
        &self,
        table: &str,
        rows: Vec<Row>,
    ) -> Result<TableSchema, StoreError> {
        let conn = self.pool.acquire().await?;
        let schema = conn.engine().create_table(table, rows).await?;
        self.sync_named(conn.engine(), table).await?;
        Ok(schema)
    }

    /// Append to an existing table, creating it if needed.
    pub async fn append_rows(&self, table: &str, rows: Vec<Row>) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.pool.acquire().await?;
        let (written, _) = self
            .append_or_create(conn.engine(), table, rows, None)
            .await?;
        self.sync_named(conn.engine(), table).await?;
        Ok(written)
    }

    /// Delete matching rows. Zero if the table does not exist.
    pub async fn delete_where(&self, table: &str, filter: &Filter) -> Result<usize, StoreError> {
        let conn = self.pool.acquire().await?;
        if !conn.engine().table_exists(table).await? {
            return Ok(0);
        }
        Ok(conn.engine().delete(table, filter).await?)
    }

    pub async fn update_where(
        &self,
        table: &str,
        filter: &Filter,
        assignments: &Row,
    ) -> Result<usize, StoreError> {
        let conn = self.pool.acquire().await?;
        if !conn.engine().table_exists(table).await? {
            return Ok(0);
        }
        Ok(conn.engine().update(table, filter, assignments).await?)
    }

    /// Read rows. Empty if the table does not exist.
    pub async fn scan_rows(
        &self,
        table: &str,
        options: &ScanOptions,
    ) -> Result<Vec<Row>, StoreError> {
        let conn = self.pool.acquire().await?;
        if !conn.engine().table_exists(table).await? {
            return Ok(Vec::new());
        }
        Ok(conn.engine().scan(table, options).await?)
    }

    /// Stream every row of `table` in one pass. `None` if it does not exist.
    pub async fn stream_rows(&self, table: &str) -> Result<Option<RowReader>, StoreError> {
        let conn = self.pool.acquire().await?;
        if !conn.engine().table_exists(table).await? {
            return Ok(None);
        }
        let rows = conn.engine().stream(table, None).await?;
        Ok(Some(RowReader { rows, _lease: conn }))
    }

    pub async fn count_rows(&self, table: &str) -> Result<usize, StoreError> {
        let conn = self.pool.acquire().await?;
        if !conn.engine().table_exists(table).await? {
            return Ok(0);
        }
        Ok(conn.engine().count_rows(table, None).await?)
    }

    pub async fn create_scalar_index(&self, table: &str, column: &str) -> Result<bool, StoreError> {
        let conn = self.pool.acquire().await?;
        let created = conn.engine().create_scalar_index(table, column).await?;
        if created {
            info!(table, column, "Created scalar index");
        }
        Ok(created)
    }

    /// Size and build a vector index on `column`, bounded by the configured
    /// timeout. Never fails; the outcome says what happened.
    pub async fn build_vector_index(&self, table: &str, column: &str) -> IndexOutcome {
        match self.pool.acquire().await {
            Ok(conn) => self.build_with_lease(conn, table, column).await,
            Err(e) => {
                warn!(table, column, error = %e, "No handle for vector index build");
                IndexOutcome::Failed(e.to_string())
            }
        }
    }

    async fn build_with_lease(&self, conn: Lease, table: &str, column: &str) -> IndexOutcome {
        let outcome = self.try_build_vector_index(conn, table, column).await;
        match &outcome {
            IndexOutcome::Built { rows_indexed } => {
                info!(table, column, rows_indexed, "Vector index ready")
            }
            IndexOutcome::Skipped { rows, required } => info!(
                table,
                column,
                rows,
                required,
                "Too few rows to train a vector index; using exhaustive search"
            ),
            IndexOutcome::NoVectors => debug!(table, column, "No embeddings to index yet"),
            IndexOutcome::InProgress => debug!(table, column, "Vector index build already running"),
            IndexOutcome::TimedOut => warn!(
                table,
                column,
                timeout_ms = self.config.index.build_timeout.as_millis() as u64,
                "Vector index build timed out; continuing without it"
            ),
            IndexOutcome::Failed(reason) => warn!(
                table,
                column,
                error = %reason,
                "Vector index build failed; continuing without it"
            ),
        }
        outcome
    }

    /// The lease moves into the build task and is returned to the pool when
    /// the build finishes, even after the caller stopped waiting.
    async fn try_build_vector_index(&self, conn: Lease, table: &str, column: &str) -> IndexOutcome {
        let sized = async {
            let engine = conn.engine();
            let width = engine.schema(table).await?.vector_width(column);
            let rows = engine
                .count_rows(table, Some(&Filter::not_null(column)))
                .await?;
            Ok::<_, EngineError>((rows, width))
        }
        .await;
        let (rows, width) = match sized {
            Ok((rows, Some(width))) => (rows, width),
            Ok((_, None)) => return IndexOutcome::Failed(format!("`{}` is not a vector column", column)),
            Err(e) => return IndexOutcome::Failed(e.to_string()),
        };
        if rows == 0 {
            return IndexOutcome::NoVectors;
        }

        let params = match self.config.index.configure(rows, width) {
            IndexDecision::Skip { rows, required } => {
                return IndexOutcome::Skipped { rows, required }
            }
            IndexDecision::Build(params) => params,
        };
        debug!(
            table,
            column,
            rows,
            num_partitions = params.num_partitions,
            num_sub_vectors = params.num_sub_vectors,
            "Building vector index"
        );

        let table_owned = table.to_string();
        let column_owned = column.to_string();
        let build = run_bounded(
            "vector index build",
            self.config.index.build_timeout,
            async move {
                conn.engine()
                    .create_vector_index(&table_owned, &column_owned, params)
                    .await
            },
        )
        .await;

        match build {
            Ok(Ok(VectorIndexBuild::Built { rows_indexed })) => IndexOutcome::Built { rows_indexed },
            Ok(Ok(VectorIndexBuild::AlreadyBuilding)) => IndexOutcome::InProgress,
            Ok(Err(e)) => IndexOutcome::Failed(e.to_string()),
            Err(StoreError::TimedOut { .. }) => IndexOutcome::TimedOut,
            Err(e) => IndexOutcome::Failed(e.to_string()),
        }
    }

    async fn sync_named(&self, engine: &Engine, table: &str) -> Result<(), StoreError> {
        if let Some(kind) = TableKind::from_table_name(table) {
            self.refresh_state(engine, kind).await?;
        }
        Ok(())
    }
}

/// Serialize a record into an engine row.
pub fn to_row<T: Serialize>(record: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidRecord(format!(
            "record serialized to non-object {}",
            other
        ))),
    }
}

/// Deserialize an engine row into a record.
pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::time::Duration;
    use tempfile::TempDir;

    const DIM: usize = 8;

    fn config() -> AdapterConfig {
        AdapterConfig {
            embedding_dimension: DIM,
            pool: PoolConfig {
                max_size: 4,
                idle_timeout: Duration::from_secs(60),
                acquire_timeout: Duration::from_secs(5),
            },
            index: IndexTuning {
                min_trainable_rows: 256,
                min_partitions: 2,
                max_partitions: 4,
                sub_vector_granularity: 4,
                min_sub_vectors: 1,
                max_sub_vectors: 8,
                build_timeout: Duration::from_secs(60),
            },
        }
    }

    fn unit(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[axis % DIM] = 1.0;
        v
    }

    fn random_chunks(start: u32, count: u32, seed: u64) -> Vec<Chunk> {
        let mut rng = StdRng::seed_from_u64(seed);
        (start..start + count)
            .map(|i| {
                let embedding: Vec<f32> = (0..DIM).map(|_| rng.random::<f32>() - 0.5).collect();
                Chunk::new("d1", i, i as u64 * 10, format!("chunk {}", i), embedding)
            })
            .collect()
    }

    async fn adapter(temp: &TempDir) -> StorageAdapter {
        StorageAdapter::open(temp.path(), config()).await.unwrap()
    }

    async fn chunk_index_built(store: &StorageAdapter) -> bool {
        store.stats().await.unwrap().tables[0].vector_index
    }

    #[tokio::test]
    async fn test_reads_before_first_write_are_empty() {
        let temp = TempDir::new().unwrap();
        let store = adapter(&temp).await;
        store.initialize().await.unwrap();

        assert_eq!(store.table_state(TableKind::Chunks), TableState::Unopened);
        assert!(store.search(&unit(0), 5, None).await.unwrap().is_empty());
        assert!(store.get_chunk("missing").await.unwrap().is_none());
        assert_eq!(store.remove_by_document("d").await.unwrap().total(), 0);
        assert_eq!(store.count(TableKind::CodeBlocks).await.unwrap(), 0);
        assert_eq!(store.add_chunks(Vec::new()).await.unwrap(), 0);
        assert!(store.stream_rows("chunks").await.unwrap().is_none());
        assert_eq!(store.table_state(TableKind::Chunks), TableState::Unopened);
    }

    #[tokio::test]
    async fn test_first_write_creates_table() {
        let temp = TempDir::new().unwrap();
        let store = adapter(&temp).await;

        let written = store
            .add_chunks(vec![Chunk::new("d1", 0, 0, "alpha", unit(0))])
            .await
            .unwrap();
        assert_eq!(written, 1);

        match store.table_state(TableKind::Chunks) {
            TableState::Created { schema } => {
                assert_eq!(schema.vector_width(EMBEDDING_COLUMN), Some(DIM))
            }
            other => panic!("expected created table, got {:?}", other),
        }

        store
            .add_chunks(vec![Chunk::new("d1", 1, 5, "beta", unit(1))])
            .await
            .unwrap();
        assert_eq!(store.count(TableKind::Chunks).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_first_write_without_embeddings_still_has_vector_column() {
        let temp = TempDir::new().unwrap();
        let store = adapter(&temp).await;
        store
            .add_chunks(vec![Chunk::new("d1", 0, 0, "pending", Vec::new())])
            .await
            .unwrap();

        match store.table_state(TableKind::Chunks) {
            TableState::Created { schema } => {
                assert_eq!(schema.vector_width(EMBEDDING_COLUMN), Some(DIM))
            }
            other => panic!("expected created table, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_scores_own_vector_highest() {
        let temp = TempDir::new().unwrap();
        let store = adapter(&temp).await;
        let chunks: Vec<Chunk> = (0..DIM as u32)
            .map(|i| Chunk::new("d1", i, i as u64 * 10, format!("chunk {}", i), unit(i as usize)))
            .collect();
        store.add_chunks(chunks).await.unwrap();

        let hits = store.search(&unit(3), 3, None).await.unwrap();
        assert_eq!(hits[0].record.chunk_index, 3);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_remove_by_document() {
        let temp = TempDir::new().unwrap();
        let store = adapter(&temp).await;
        store
            .add_chunks(vec![
                Chunk::new("keep", 0, 0, "a", unit(0)),
                Chunk::new("gone", 0, 0, "b", unit(1)),
                Chunk::new("gone", 1, 1, "c", unit(2)),
            ])
            .await
            .unwrap();
        store
            .add_code_blocks(vec![CodeBlock::new("gone", 0, "py", "print(1)", unit(3))])
            .await
            .unwrap();

        let removed = store.remove_by_document("gone").await.unwrap();
        assert_eq!(
            removed,
            RemovalCounts {
                chunks: 2,
                code_blocks: 1
            }
        );

        for axis in 0..DIM {
            let hits = store.search(&unit(axis), 10, None).await.unwrap();
            assert!(hits.iter().all(|h| h.record.document_id != "gone"));
        }
    }

    #[tokio::test]
    async fn test_code_blocks_skip_empty_and_filter_language() {
        let temp = TempDir::new().unwrap();
        let store = adapter(&temp).await;
        let mut raw = CodeBlock::new("d1", 2, "rust", "fn main() {}", unit(2));
        raw.language = "RS".to_string();
        let written = store
            .add_code_blocks(vec![
                CodeBlock::new("d1", 1, "js", "let x = 1;", unit(1)),
                CodeBlock::new("d1", 0, "python", "   \n", unit(0)),
                raw,
            ])
            .await
            .unwrap();
        assert_eq!(written, 2);

        let blocks = store.get_code_blocks_by_document("d1").await.unwrap();
        let languages: Vec<&str> = blocks.iter().map(|b| b.language.as_str()).collect();
        assert_eq!(languages, vec!["javascript", "rust"]);

        let hits = store
            .search_code_blocks(&unit(1), 5, Some("Rust"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.language, "rust");
    }

    #[tokio::test]
    async fn test_invalid_chunk_rejected() {
        let temp = TempDir::new().unwrap();
        let store = adapter(&temp).await;
        let err = store
            .add_chunks(vec![Chunk::new("d1", 0, 0, "x", vec![1.0; DIM + 1])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        assert_eq!(store.table_state(TableKind::Chunks), TableState::Unopened);
    }

    #[tokio::test]
    async fn test_unembedded_chunks_then_embedded() {
        let temp = TempDir::new().unwrap();
        let store = adapter(&temp).await;
        store
            .add_chunks(vec![Chunk::new("d1", 0, 0, "pending", Vec::new())])
            .await
            .unwrap();
        assert!(store.search(&unit(0), 5, None).await.unwrap().is_empty());

        store
            .add_chunks(vec![Chunk::new("d1", 1, 7, "embedded", unit(0))])
            .await
            .unwrap();
        let hits = store.search(&unit(0), 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.content, "embedded");
    }

    #[tokio::test]
    async fn test_stream_rows_reads_table_once() {
        let temp = TempDir::new().unwrap();
        let store = adapter(&temp).await;
        store.add_chunks(random_chunks(0, 25, 3)).await.unwrap();

        let mut reader = store.stream_rows("chunks").await.unwrap().unwrap();
        let mut seen = Vec::new();
        loop {
            let rows = reader.next_rows(10).await.unwrap();
            if rows.is_empty() {
                break;
            }
            assert!(rows.len() <= 10);
            seen.extend(rows.into_iter().map(|r| r["chunk_index"].as_u64().unwrap()));
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..25).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_index_built_once_threshold_crossed() {
        let temp = TempDir::new().unwrap();
        let store = adapter(&temp).await;

        store.add_chunks(random_chunks(0, 200, 1)).await.unwrap();
        let outcome = store
            .build_vector_index(TableKind::Chunks.table_name(), EMBEDDING_COLUMN)
            .await;
        assert_eq!(
            outcome,
            IndexOutcome::Skipped {
                rows: 200,
                required: 256
            }
        );
        assert!(!chunk_index_built(&store).await);

        store.add_chunks(random_chunks(200, 100, 2)).await.unwrap();
        let stats = store.stats().await.unwrap();
        let chunks = stats
            .tables
            .iter()
            .find(|t| t.kind == TableKind::Chunks)
            .unwrap();
        assert_eq!(chunks.rows, 300);
        assert!(chunks.vector_index);

        let first = random_chunks(0, 1, 1).remove(0);
        let hits = store.search(&first.embedding, 5, None).await.unwrap();
        assert!(hits.iter().any(|h| h.record.chunk_index == 0));
    }

    #[tokio::test]
    async fn test_initialize_builds_index_after_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let mut strict = config();
            strict.index.min_trainable_rows = 1_000;
            let store = StorageAdapter::open(temp.path(), strict).await.unwrap();
            store.add_chunks(random_chunks(0, 300, 4)).await.unwrap();
            assert!(!chunk_index_built(&store).await);
            store.close().await.unwrap();
        }

        let store = adapter(&temp).await;
        store.initialize().await.unwrap();
        assert!(matches!(
            store.table_state(TableKind::Chunks),
            TableState::Created { .. }
        ));
        let stats = store.stats().await.unwrap();
        assert!(stats.tables[0].vector_index);
        assert!(!stats.tables[1].created);
    }

    #[tokio::test]
    async fn test_index_build_keeps_its_handle_after_timeout() {
        let temp = TempDir::new().unwrap();
        let mut cfg = config();
        cfg.pool.max_size = 1;
        cfg.pool.acquire_timeout = Duration::from_secs(60);
        cfg.index.build_timeout = Duration::from_millis(1);
        let store = StorageAdapter::open(temp.path(), cfg).await.unwrap();

        store.add_chunks(random_chunks(0, 300, 5)).await.unwrap();

        // A returned handle means the build has finished.
        let leased = store.pool().stats().leased;
        assert!(leased <= 1);
        if leased == 0 {
            assert!(chunk_index_built(&store).await);
        }

        // The next caller waits for the build's handle, then sees the index.
        assert!(chunk_index_built(&store).await);
        assert_eq!(store.pool().stats().total, 1);
    }

    #[tokio::test]
    async fn test_closed_adapter_rejects_calls() {
        let temp = TempDir::new().unwrap();
        let store = adapter(&temp).await;
        store.close().await.unwrap();
        assert!(matches!(
            store.count(TableKind::Chunks).await,
            Err(StoreError::PoolClosed)
        ));
    }

    #[test]
    fn test_distance_to_score() {
        assert_eq!(distance_to_score(0.0), 1.0);
        assert_eq!(distance_to_score(1.0), 0.5);
        assert_eq!(distance_to_score(2.0), 0.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate().is_ok());
        let bad = AdapterConfig {
            embedding_dimension: 0,
            ..config()
        };
        assert!(bad.validate().is_err());
    }
}
