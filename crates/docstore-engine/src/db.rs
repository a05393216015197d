//! LanceDB-backed table engine.
//!
//! Provides:
//! - Table create/drop with schema inference from the first batch
//! - Batched appends, predicate deletes and updates
//! - Filtered scans, either collected or streamed batch by batch
//! - BTree scalar indexes and IVF-PQ vector indexes
//! - Cosine vector search with optional prefilters
//!
//! Every operation opens the table fresh, so writers on other handles are
//! visible to the next call.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use arrow::record_batch::RecordBatchIterator;
use lancedb::arrow::SendableRecordBatchStream;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::Table;
use serde_json::Value;
use tracing::{debug, info};

use crate::batch::{batch_to_rows, distances, rows_to_batch};
use crate::error::EngineError;
use crate::filter::{literal, Filter};
use crate::index::{scalar_index, VectorIndexParams};
use crate::schema::{ColumnType, TableSchema};
use crate::Row;

/// Candidates re-ranked with exact distances after an IVF-PQ lookup
const REFINE_FACTOR: u32 = 10;

/// Index inventory of a table, by indexed column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableIndexes {
    pub scalar: Vec<String>,
    pub vector: Vec<String>,
}

impl TableIndexes {
    pub fn has_vector_index(&self, column: &str) -> bool {
        self.vector.iter().any(|c| c == column)
    }
}

/// Outcome of a vector index build request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorIndexBuild {
    Built { rows_indexed: usize },
    /// Another build for the same table is still running
    AlreadyBuilding,
}

/// Filtering and an optional row cap for scans
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub filter: Option<Filter>,
    pub limit: Option<usize>,
}

impl ScanOptions {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            ..Default::default()
        }
    }
}

/// A row returned by vector search with its raw distance
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRow {
    pub row: Row,
    /// Cosine distance in [0, 2]; 0 is identical direction
    pub distance: f32,
}

/// Forward-only reader over a table scan.
///
/// Batches are decoded as they arrive, so a full pass over a large table
/// holds at most one batch plus the rows requested.
pub struct RowStream {
    table: String,
    schema: TableSchema,
    batches: SendableRecordBatchStream,
    pending: VecDeque<Row>,
    exhausted: bool,
}

impl RowStream {
    /// Up to `max` rows; an empty result means the scan is finished.
    pub async fn next_rows(&mut self, max: usize) -> Result<Vec<Row>, EngineError> {
        while self.pending.len() < max && !self.exhausted {
            match futures::StreamExt::next(&mut self.batches).await {
                Some(batch) => {
                    let batch = batch.map_err(|e| EngineError::lance(&self.table, e))?;
                    self.pending
                        .extend(batch_to_rows(&self.table, &self.schema, &batch)?);
                }
                None => self.exhausted = true,
            }
        }
        let take = max.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }
}

/// Removes a table from the in-progress build set on every exit path.
struct BuildGuard<'a> {
    building: &'a Mutex<HashSet<String>>,
    table: String,
}

impl<'a> BuildGuard<'a> {
    fn enter(building: &'a Mutex<HashSet<String>>, table: &str) -> Option<Self> {
        let inserted = building
            .lock()
            .expect("build set mutex poisoned")
            .insert(table.to_string());
        inserted.then(|| Self {
            building,
            table: table.to_string(),
        })
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.building
            .lock()
            .expect("build set mutex poisoned")
            .remove(&self.table);
    }
}

/// Table engine over one LanceDB database directory
pub struct Engine {
    db: Connection,
    path: PathBuf,
    building: Mutex<HashSet<String>>,
}

impl Engine {
    /// Open the database at the given path, creating it if necessary
    pub async fn open(path: &Path) -> Result<Self, EngineError> {
        let uri = path.to_string_lossy().to_string();
        let db = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| EngineError::Connect {
                uri: uri.clone(),
                cause: e.to_string(),
            })?;
        info!(path = %path.display(), "Opened table engine");
        Ok(Self {
            db,
            path: path.to_path_buf(),
            building: Mutex::new(HashSet::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn table_names(&self) -> Result<Vec<String>, EngineError> {
        self.db
            .table_names()
            .execute()
            .await
            .map_err(|e| EngineError::lance("*", e))
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool, EngineError> {
        Ok(self.table_names().await?.iter().any(|name| name == table))
    }

    async fn open_table(&self, table: &str) -> Result<Table, EngineError> {
        if !self.table_exists(table).await? {
            return Err(EngineError::TableNotFound(table.to_string()));
        }
        self.db
            .open_table(table)
            .execute()
            .await
            .map_err(|e| EngineError::lance(table, e))
    }

    async fn schema_of(&self, table: &str, handle: &Table) -> Result<TableSchema, EngineError> {
        let arrow = handle
            .schema()
            .await
            .map_err(|e| EngineError::lance(table, e))?;
        TableSchema::from_arrow(table, &arrow)
    }

    pub async fn schema(&self, table: &str) -> Result<TableSchema, EngineError> {
        let handle = self.open_table(table).await?;
        self.schema_of(table, &handle).await
    }

    /// Create a table whose schema is inferred from `rows`.
    pub async fn create_table(&self, table: &str, rows: Vec<Row>) -> Result<TableSchema, EngineError> {
        let schema = TableSchema::infer(table, &rows)?;
        self.create_table_with(table, schema, rows).await
    }

    /// Create a table with an explicit schema. `rows` may be empty.
    pub async fn create_table_with(
        &self,
        table: &str,
        schema: TableSchema,
        rows: Vec<Row>,
    ) -> Result<TableSchema, EngineError> {
        if self.table_exists(table).await? {
            return Err(EngineError::TableExists(table.to_string()));
        }
        let rows = conform_all(table, &schema, rows)?;
        let batch = rows_to_batch(table, &schema, &rows)?;
        let arrow = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], arrow);

        self.db
            .create_table(table, reader)
            .execute()
            .await
            .map_err(|e| match e {
                lancedb::Error::TableAlreadyExists { .. } => {
                    EngineError::TableExists(table.to_string())
                }
                other => EngineError::lance(table, other),
            })?;
        info!(table, rows = rows.len(), columns = schema.columns.len(), "Created table");
        Ok(schema)
    }

    /// Drop a table. Returns false if it did not exist.
    pub async fn drop_table(&self, table: &str) -> Result<bool, EngineError> {
        if !self.table_exists(table).await? {
            return Ok(false);
        }
        self.db
            .drop_table(table, &[])
            .await
            .map_err(|e| EngineError::lance(table, e))?;
        info!(table, "Dropped table");
        Ok(true)
    }

    /// Append rows. Either every row lands or none does.
    pub async fn add(&self, table: &str, rows: Vec<Row>) -> Result<usize, EngineError> {
        let handle = self.open_table(table).await?;
        if rows.is_empty() {
            return Ok(0);
        }
        let schema = self.schema_of(table, &handle).await?;
        let rows = conform_all(table, &schema, rows)?;
        let batch = rows_to_batch(table, &schema, &rows)?;
        let arrow = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], arrow);

        handle
            .add(reader)
            .execute()
            .await
            .map_err(|e| EngineError::lance(table, e))?;
        debug!(table, rows = rows.len(), "Appended rows");
        Ok(rows.len())
    }

    /// Delete matching rows. Returns how many matched.
    pub async fn delete(&self, table: &str, filter: &Filter) -> Result<usize, EngineError> {
        let handle = self.open_table(table).await?;
        let predicate = filter.to_sql();
        let matched = handle
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(|e| EngineError::lance(table, e))?;
        if matched == 0 {
            return Ok(0);
        }
        handle
            .delete(&predicate)
            .await
            .map_err(|e| EngineError::lance(table, e))?;
        debug!(table, rows = matched, filter = %predicate, "Deleted rows");
        Ok(matched)
    }

    /// Set columns on matching rows. Returns how many matched.
    pub async fn update(
        &self,
        table: &str,
        filter: &Filter,
        assignments: &Row,
    ) -> Result<usize, EngineError> {
        let handle = self.open_table(table).await?;
        let schema = self.schema_of(table, &handle).await?;
        let mut candidate = assignments.clone();
        schema.conform(table, &mut candidate)?;
        if let Some(column) = assignments
            .keys()
            .find(|name| schema.vector_width(name).is_some())
        {
            return Err(EngineError::InvalidArgument(format!(
                "cannot assign vector column `{}` of {}",
                column, table
            )));
        }

        let predicate = filter.to_sql();
        let matched = handle
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(|e| EngineError::lance(table, e))?;
        if matched == 0 || assignments.is_empty() {
            return Ok(matched);
        }

        let mut update = handle.update().only_if(predicate);
        for (column, value) in assignments {
            let expr = match (schema.column(column).map(|c| c.column_type), value) {
                (_, Value::Null) => "NULL".to_string(),
                (Some(ColumnType::Json), other) => literal(&Value::String(other.to_string())),
                (_, other) => literal(other),
            };
            update = update.column(column.as_str(), expr);
        }
        update
            .execute()
            .await
            .map_err(|e| EngineError::lance(table, e))?;
        debug!(table, rows = matched, "Updated rows");
        Ok(matched)
    }

    /// Collect matching rows, up to the limit.
    pub async fn scan(&self, table: &str, options: &ScanOptions) -> Result<Vec<Row>, EngineError> {
        let handle = self.open_table(table).await?;
        let schema = self.schema_of(table, &handle).await?;

        let mut query = handle.query();
        if let Some(filter) = &options.filter {
            query = query.only_if(filter.to_sql());
        }
        if let Some(limit) = options.limit {
            query = query.limit(limit);
        }
        let mut batches = query
            .execute()
            .await
            .map_err(|e| EngineError::lance(table, e))?;

        let mut rows = Vec::new();
        while let Some(batch) = futures::StreamExt::next(&mut batches).await {
            let batch = batch.map_err(|e| EngineError::lance(table, e))?;
            rows.extend(batch_to_rows(table, &schema, &batch)?);
        }
        Ok(rows)
    }

    /// Open a forward-only reader over matching rows.
    pub async fn stream(&self, table: &str, filter: Option<&Filter>) -> Result<RowStream, EngineError> {
        let handle = self.open_table(table).await?;
        let schema = self.schema_of(table, &handle).await?;
        let mut query = handle.query();
        if let Some(filter) = filter {
            query = query.only_if(filter.to_sql());
        }
        let batches = query
            .execute()
            .await
            .map_err(|e| EngineError::lance(table, e))?;
        Ok(RowStream {
            table: table.to_string(),
            schema,
            batches,
            pending: VecDeque::new(),
            exhausted: false,
        })
    }

    pub async fn count_rows(&self, table: &str, filter: Option<&Filter>) -> Result<usize, EngineError> {
        let handle = self.open_table(table).await?;
        handle
            .count_rows(filter.map(Filter::to_sql))
            .await
            .map_err(|e| EngineError::lance(table, e))
    }

    /// Create a BTree index on a scalar column. Returns false if one
    /// already exists.
    pub async fn create_scalar_index(&self, table: &str, column: &str) -> Result<bool, EngineError> {
        let handle = self.open_table(table).await?;
        let schema = self.schema_of(table, &handle).await?;
        match schema.column(column) {
            Some(c) if c.column_type.is_scalar() => {}
            Some(_) => {
                return Err(EngineError::InvalidArgument(format!(
                    "column `{}` of {} cannot carry a scalar index",
                    column, table
                )))
            }
            None => {
                return Err(EngineError::InvalidArgument(format!(
                    "table {} has no column `{}`",
                    table, column
                )))
            }
        }
        if self.indexes_of(table, &handle, &schema).await?.scalar.iter().any(|c| c == column) {
            return Ok(false);
        }

        handle
            .create_index(&[column], scalar_index())
            .execute()
            .await
            .map_err(|e| EngineError::lance(table, e))?;
        debug!(table, column, "Created scalar index");
        Ok(true)
    }

    /// Train an IVF-PQ index over the non-null vectors of `column`,
    /// replacing any previous one.
    pub async fn create_vector_index(
        &self,
        table: &str,
        column: &str,
        params: VectorIndexParams,
    ) -> Result<VectorIndexBuild, EngineError> {
        let Some(_guard) = BuildGuard::enter(&self.building, table) else {
            return Ok(VectorIndexBuild::AlreadyBuilding);
        };
        let handle = self.open_table(table).await?;
        let schema = self.schema_of(table, &handle).await?;
        if schema.vector_width(column).is_none() {
            return Err(EngineError::InvalidArgument(format!(
                "column `{}` of {} is not a vector column",
                column, table
            )));
        }

        let rows_indexed = handle
            .count_rows(Some(Filter::not_null(column).to_sql()))
            .await
            .map_err(|e| EngineError::lance(table, e))?;
        handle
            .create_index(&[column], params.to_index())
            .replace(true)
            .execute()
            .await
            .map_err(|e| EngineError::lance(table, e))?;

        info!(
            table,
            column,
            rows_indexed,
            num_partitions = params.num_partitions,
            num_sub_vectors = params.num_sub_vectors,
            "Built vector index"
        );
        Ok(VectorIndexBuild::Built { rows_indexed })
    }

    async fn indexes_of(
        &self,
        table: &str,
        handle: &Table,
        schema: &TableSchema,
    ) -> Result<TableIndexes, EngineError> {
        let configs = handle
            .list_indices()
            .await
            .map_err(|e| EngineError::lance(table, e))?;
        let mut indexes = TableIndexes::default();
        for column in configs.into_iter().flat_map(|config| config.columns) {
            if schema.vector_width(&column).is_some() {
                indexes.vector.push(column);
            } else {
                indexes.scalar.push(column);
            }
        }
        Ok(indexes)
    }

    pub async fn indexes(&self, table: &str) -> Result<TableIndexes, EngineError> {
        let handle = self.open_table(table).await?;
        let schema = self.schema_of(table, &handle).await?;
        self.indexes_of(table, &handle, &schema).await
    }

    /// Nearest rows to `query` by cosine distance, closest first.
    ///
    /// Rows without a vector never match. The filter is applied before the
    /// nearest-neighbour cut, so a filtered search still returns up to
    /// `limit` rows.
    pub async fn vector_search(
        &self,
        table: &str,
        column: &str,
        query: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredRow>, EngineError> {
        let handle = self.open_table(table).await?;
        let schema = self.schema_of(table, &handle).await?;
        let width = schema.vector_width(column).ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "column `{}` of {} is not a vector column",
                column, table
            ))
        })?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        if query.len() != width {
            return Err(EngineError::InvalidArgument(format!(
                "query has {} dimensions, column `{}` has {}",
                query.len(),
                column,
                width
            )));
        }

        let predicate = match filter {
            Some(filter) => filter.clone().and(Filter::not_null(column)),
            None => Filter::not_null(column),
        };
        let mut batches = handle
            .vector_search(query.to_vec())
            .map_err(|e| EngineError::lance(table, e))?
            .column(column)
            .distance_type(lancedb::DistanceType::Cosine)
            .refine_factor(REFINE_FACTOR)
            .only_if(predicate.to_sql())
            .limit(limit)
            .execute()
            .await
            .map_err(|e| EngineError::lance(table, e))?;

        let mut hits = Vec::new();
        while let Some(batch) = futures::StreamExt::next(&mut batches).await {
            let batch = batch.map_err(|e| EngineError::lance(table, e))?;
            let rows = batch_to_rows(table, &schema, &batch)?;
            let scores = distances(table, &batch)?;
            hits.extend(
                rows.into_iter()
                    .zip(scores)
                    .map(|(row, distance)| ScoredRow { row, distance }),
            );
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }
}

fn conform_all(table: &str, schema: &TableSchema, rows: Vec<Row>) -> Result<Vec<Row>, EngineError> {
    rows.into_iter()
        .map(|mut row| {
            schema.conform(table, &mut row)?;
            Ok(row)
        })
        .collect()
}

/// Shorthand for building rows from `serde_json::json!` literals.
pub fn row_from_value(value: Value) -> Result<Row, EngineError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(EngineError::InvalidArgument(format!(
            "rows must be JSON objects, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{DistanceMetric, VectorIndexKind};
    use serde_json::json;
    use tempfile::TempDir;

    fn row(value: Value) -> Row {
        row_from_value(value).unwrap()
    }

    fn chunk(id: &str, doc: &str, v: [f32; 4]) -> Row {
        row(json!({"id": id, "document_id": doc, "embedding": v.to_vec()}))
    }

    async fn engine(temp: &TempDir) -> Engine {
        Engine::open(temp.path()).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_add_and_count() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp).await;
        assert!(!engine.table_exists("chunks").await.unwrap());

        engine
            .create_table("chunks", vec![chunk("a", "d1", [1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert!(engine.table_exists("chunks").await.unwrap());
        assert_eq!(
            engine.schema("chunks").await.unwrap().vector_width("embedding"),
            Some(4)
        );

        let added = engine
            .add(
                "chunks",
                vec![
                    chunk("b", "d1", [0.0, 1.0, 0.0, 0.0]),
                    chunk("c", "d2", [0.0, 0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(engine.count_rows("chunks", None).await.unwrap(), 3);
        assert_eq!(
            engine
                .count_rows("chunks", Some(&Filter::eq("document_id", "d1")))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp).await;
        engine.create_table("t", vec![row(json!({"id": "a"}))]).await.unwrap();
        let err = engine
            .create_table("t", vec![row(json!({"id": "b"}))])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TableExists(_)));
    }

    #[tokio::test]
    async fn test_missing_table_errors() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp).await;
        assert!(matches!(
            engine.add("nope", vec![row(json!({"id": "a"}))]).await,
            Err(EngineError::TableNotFound(_))
        ));
        assert!(!engine.drop_table("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_schema_mismatch_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp).await;
        engine
            .create_table("chunks", vec![chunk("a", "d1", [1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();

        let bad = vec![
            chunk("b", "d1", [0.0, 1.0, 0.0, 0.0]),
            row(json!({"id": "c", "embedding": [1.0]})),
        ];
        assert!(matches!(
            engine.add("chunks", bad).await,
            Err(EngineError::SchemaMismatch { .. })
        ));
        assert_eq!(engine.count_rows("chunks", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_update() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp).await;
        engine
            .create_table(
                "docs",
                vec![
                    row(json!({"id": "a", "count": 0, "title": "x"})),
                    row(json!({"id": "b", "count": 0, "title": "y"})),
                ],
            )
            .await
            .unwrap();

        let mut set = Row::new();
        set.insert("count".into(), json!(5));
        set.insert("title".into(), json!("it's"));
        assert_eq!(
            engine.update("docs", &Filter::eq("id", "a"), &set).await.unwrap(),
            1
        );
        let rows = engine
            .scan("docs", &ScanOptions::filtered(Filter::eq("id", "a")))
            .await
            .unwrap();
        assert_eq!(rows[0]["count"], json!(5));
        assert_eq!(rows[0]["title"], json!("it's"));

        assert_eq!(engine.delete("docs", &Filter::eq("id", "b")).await.unwrap(), 1);
        assert_eq!(engine.delete("docs", &Filter::eq("id", "b")).await.unwrap(), 0);
        assert_eq!(engine.count_rows("docs", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stream_reads_every_row_once() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp).await;
        let rows: Vec<Row> = (0..25).map(|i| row(json!({"n": i}))).collect();
        engine.create_table("nums", rows).await.unwrap();

        let mut stream = engine.stream("nums", None).await.unwrap();
        let mut seen = Vec::new();
        loop {
            let page = stream.next_rows(7).await.unwrap();
            if page.is_empty() {
                break;
            }
            assert!(page.len() <= 7);
            seen.extend(page.iter().map(|r| r["n"].as_i64().unwrap()));
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..25).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_scalar_index_created_once() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp).await;
        engine
            .create_table(
                "chunks",
                vec![
                    chunk("a", "d1", [1.0, 0.0, 0.0, 0.0]),
                    chunk("b", "d2", [0.0, 1.0, 0.0, 0.0]),
                ],
            )
            .await
            .unwrap();
        assert!(engine.create_scalar_index("chunks", "document_id").await.unwrap());
        assert!(!engine.create_scalar_index("chunks", "document_id").await.unwrap());
        assert!(engine.create_scalar_index("chunks", "embedding").await.is_err());
        assert_eq!(
            engine.indexes("chunks").await.unwrap().scalar,
            vec!["document_id".to_string()]
        );

        let filter = Filter::eq("document_id", "d1");
        engine
            .add("chunks", vec![chunk("c", "d1", [0.0, 0.0, 1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(engine.count_rows("chunks", Some(&filter)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_exhaustive_search_orders_by_distance() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp).await;
        engine
            .create_table(
                "chunks",
                vec![
                    chunk("x", "d1", [1.0, 0.0, 0.0, 0.0]),
                    chunk("y", "d1", [0.7, 0.7, 0.0, 0.0]),
                    chunk("z", "d2", [-1.0, 0.0, 0.0, 0.0]),
                    row(json!({"id": "pending", "document_id": "d2", "embedding": []})),
                ],
            )
            .await
            .unwrap();

        let hits = engine
            .vector_search("chunks", "embedding", &[1.0, 0.0, 0.0, 0.0], 5, None)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.row["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
        assert!(hits[0].distance < 1e-5);
        assert!((hits[2].distance - 2.0).abs() < 1e-5);

        let filtered = engine
            .vector_search(
                "chunks",
                "embedding",
                &[1.0, 0.0, 0.0, 0.0],
                3,
                Some(&Filter::eq("document_id", "d2")),
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].row["id"], json!("z"));

        assert!(engine
            .vector_search("chunks", "embedding", &[1.0, 0.0], 3, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_vector_index_built_and_reported() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp).await;
        let rows: Vec<Row> = (0..300)
            .map(|i| {
                let angle = i as f32 * 0.02;
                chunk(
                    &format!("r{}", i),
                    "d1",
                    [angle.cos(), angle.sin(), 0.1, (i % 7) as f32 * 0.05],
                )
            })
            .collect();
        engine.create_table("chunks", rows).await.unwrap();

        let params = VectorIndexParams {
            kind: VectorIndexKind::IvfPq,
            metric: DistanceMetric::Cosine,
            num_partitions: 2,
            num_sub_vectors: 2,
        };
        let build = engine
            .create_vector_index("chunks", "embedding", params)
            .await
            .unwrap();
        assert_eq!(build, VectorIndexBuild::Built { rows_indexed: 300 });
        assert!(engine
            .indexes("chunks")
            .await
            .unwrap()
            .has_vector_index("embedding"));

        let hits = engine
            .vector_search("chunks", "embedding", &[1.0, 0.0, 0.1, 0.0], 3, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows_and_indexes() {
        let temp = TempDir::new().unwrap();
        {
            let engine = engine(&temp).await;
            engine
                .create_table("chunks", vec![chunk("a", "d1", [1.0, 0.0, 0.0, 0.0])])
                .await
                .unwrap();
            engine.create_scalar_index("chunks", "document_id").await.unwrap();
        }
        let engine = engine(&temp).await;
        assert_eq!(engine.count_rows("chunks", None).await.unwrap(), 1);
        let indexes = engine.indexes("chunks").await.unwrap();
        assert_eq!(indexes.scalar, vec!["document_id".to_string()]);
        assert!(!indexes.has_vector_index("embedding"));
    }

    #[tokio::test]
    async fn test_drop_table_removes_rows() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp).await;
        engine
            .create_table("chunks", vec![chunk("a", "d1", [1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
        engine
            .create_table("chunks_v2", vec![chunk("b", "d1", [1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert!(engine.drop_table("chunks").await.unwrap());
        assert!(!engine.table_exists("chunks").await.unwrap());
        assert_eq!(engine.count_rows("chunks_v2", None).await.unwrap(), 1);

        engine
            .create_table("chunks", vec![chunk("c", "d1", [1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(engine.count_rows("chunks", None).await.unwrap(), 1);
    }
}
