//! Legacy-to-normalized migration.
//!
//! A migration runs in phases against a freshly reset destination:
//!
//! 1. Locate the source (a newer backup wins over the live store)
//! 2. Reset every destination table to an empty, schema-fixed state
//! 3. Derive one document per distinct `document_id`, with tags and
//!    languages from chunk metadata
//! 4. Copy chunks, converting legacy embeddings
//! 5. Copy code blocks, skipping empty ones
//! 6. Mine title and content keywords
//! 7. Create scalar and vector indexes
//! 8. Validate counts and record the schema version
//!
//! Source tables are streamed once per pass. Every destination batch write
//! goes through the [`RetryPolicy`] and is bounded by the phase timeout.
//! Phase failures land in [`MigrationResult::errors`]; the destination is
//! left as written.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use docstore_engine::{Filter, Row, ScanOptions};
use docstore_storage::{
    from_row, run_bounded, to_row, AdapterConfig, IndexOutcome, RowReader, StorageAdapter,
    EMBEDDING_COLUMN,
};
use docstore_types::{
    normalize_language, tables, Chunk, CodeBlock, ContentHasher, Document, DocumentLanguage,
    DocumentStatus, DocumentTag, Keyword, KeywordSource, Provenance, SchemaVersion, Settings,
    TableRecord,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::MigrationError;
use crate::keywords::{top_keywords, KeywordCounter};
use crate::legacy::{convert_vector, flatten, integer, string_list, text, timestamp};
use crate::options::{MigrationOptions, MigrationResult, ValidationReport};
use crate::retry::RetryPolicy;
use crate::source::locate_source;

const DOCUMENT_ID_FIELDS: &[&str] = &["document_id", "doc_id", "documentId"];
const CONTENT_FIELDS: &[&str] = &["content", "text"];
const URL_FIELDS: &[&str] = &["source_url", "url"];
const VECTOR_FIELDS: &[&str] = &["embedding", "vector"];

/// Scalar indexes created on the destination, per table.
const SCALAR_INDEXES: &[(&str, &[&str])] = &[
    (tables::DOCUMENTS, &["id", "status", "source_kind", "created_at"]),
    (tables::CHUNKS, &["id", "document_id", "created_at"]),
    (tables::CODE_BLOCKS, &["id", "document_id", "language"]),
    (tables::DOCUMENT_TAGS, &["document_id", "tag"]),
    (tables::DOCUMENT_LANGUAGES, &["document_id", "language"]),
    (tables::KEYWORDS, &["document_id", "keyword", "source"]),
    (tables::SCHEMA_VERSION, &["version"]),
];

/// What the document phase keeps about each source document. Chunk text is
/// folded into the digest and keyword counts as it streams past.
#[derive(Default)]
struct DocumentGroup {
    /// Flattened first chunk row, minus content and embedding
    metadata: Row,
    chunk_count: u64,
    hasher: ContentHasher,
    keywords: KeywordCounter,
}

impl DocumentGroup {
    fn add_chunk_text(&mut self, text: &str) {
        self.chunk_count += 1;
        self.hasher.update(text);
        self.keywords.push(text);
    }

    fn content_hash(&self) -> String {
        self.hasher.clone().finish()
    }
}

/// Per-document numbering carried across chunk pages.
#[derive(Debug, Default)]
struct Cursor {
    next_index: u64,
    next_offset: u64,
}

pub struct Migrator {
    config: AdapterConfig,
}

impl Migrator {
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(AdapterConfig::from(settings))
    }

    /// Migrate `source` (or its newest backup) into `destination`.
    ///
    /// Returns `Err` only for unusable options; everything that goes wrong
    /// once the run starts is reported in the result.
    pub async fn migrate(
        &self,
        source: &Path,
        destination: &Path,
        options: &MigrationOptions,
    ) -> Result<MigrationResult, MigrationError> {
        options.validate()?;
        let started = Instant::now();
        let mut result = MigrationResult::new(destination.to_path_buf(), options.dry_run);

        info!(
            source = %source.display(),
            destination = %destination.display(),
            dry_run = options.dry_run,
            "Starting migration"
        );

        let source_used = match locate_source(source) {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "Cannot locate migration source");
                result.errors.push(e.to_string());
                result.elapsed = started.elapsed();
                return Ok(result);
            }
        };
        if same_location(&source_used, destination) {
            return Err(MigrationError::InvalidOptions(format!(
                "source and destination are both {}",
                destination.display()
            )));
        }
        result.source_used = Some(source_used.clone());

        if options.dry_run {
            info!(source = %source_used.display(), "Dry run; nothing written");
            result.success = true;
            result.elapsed = started.elapsed();
            return Ok(result);
        }

        if let Err(e) = self.run(&source_used, destination, options, &mut result).await {
            error!(error = %e, "Migration failed");
            result.errors.push(e.to_string());
            result.success = false;
        }
        result.elapsed = started.elapsed();

        info!(
            success = result.success,
            documents = result.counts.documents,
            chunks = result.counts.chunks,
            code_blocks = result.counts.code_blocks,
            warnings = result.warnings.len(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Migration finished"
        );
        Ok(result)
    }

    async fn run(
        &self,
        source: &Path,
        destination: &Path,
        options: &MigrationOptions,
        result: &mut MigrationResult,
    ) -> Result<(), MigrationError> {
        let source_store = StorageAdapter::open(source, self.config).await?;
        let mut dest_config = self.config;
        dest_config.index.build_timeout = options.phase_timeout;
        let dest = match StorageAdapter::open(destination, dest_config).await {
            Ok(dest) => Arc::new(dest),
            Err(e) => {
                close_quietly(&source_store, "source").await;
                return Err(e.into());
            }
        };

        let outcome = self.run_phases(&source_store, &dest, options, result).await;
        close_quietly(&source_store, "source").await;
        close_quietly(&dest, "destination").await;
        outcome
    }

    async fn run_phases(
        &self,
        source: &StorageAdapter,
        dest: &Arc<StorageAdapter>,
        options: &MigrationOptions,
        result: &mut MigrationResult,
    ) -> Result<(), MigrationError> {
        let retry = &options.retry;

        prepare_destination_schema(dest, self.config.embedding_dimension, retry).await?;
        info!("Destination schema prepared");

        let groups = collect_documents(source, options.batch_size, result).await?;
        let mut languages = write_documents(dest, &groups, options, result).await?;
        info!(documents = result.counts.documents, tags = result.counts.tags, "Documents migrated");

        migrate_chunks(source, dest, self.config.embedding_dimension, options, result).await?;
        info!(chunks = result.counts.chunks, "Chunks migrated");

        migrate_code_blocks(
            source,
            dest,
            self.config.embedding_dimension,
            options,
            &mut languages,
            result,
        )
        .await?;
        info!(
            code_blocks = result.counts.code_blocks,
            skipped = result.counts.skipped_code_blocks,
            "Code blocks migrated"
        );

        write_keywords(dest, &groups, options, result).await?;
        info!(keywords = result.counts.keywords, "Keyword index populated");

        if options.build_indexes {
            create_indexes(dest, result).await;
        }

        if options.validate {
            let report = validate_migration(source, dest, result.counts.skipped_code_blocks).await?;
            let passed = report.passed();
            let problems = report.problems.join("; ");
            result.validation = Some(report);
            if !passed {
                warn!(problems = %problems, "Migration validation failed");
                result
                    .errors
                    .push(MigrationError::ValidationFailed(problems).to_string());
                result.success = false;
                return Ok(());
            }
        }

        let version = SchemaVersion::new(
            options.schema_version.clone(),
            "Normalized documents, chunks, code blocks and labels",
        );
        append(dest, options, tables::SCHEMA_VERSION, vec![to_row(&version)?]).await?;
        info!(version = %options.schema_version, "Schema version recorded");
        result.schema_version = Some(options.schema_version.clone());
        result.success = true;
        Ok(())
    }
}

/// Drop and recreate every destination table, leaving each empty with its
/// final column set.
pub async fn prepare_destination_schema(
    dest: &StorageAdapter,
    dimension: usize,
    retry: &RetryPolicy,
) -> Result<(), MigrationError> {
    reset_table::<Document>(dest, dimension, retry).await?;
    reset_table::<Chunk>(dest, dimension, retry).await?;
    reset_table::<CodeBlock>(dest, dimension, retry).await?;
    reset_table::<DocumentTag>(dest, dimension, retry).await?;
    reset_table::<DocumentLanguage>(dest, dimension, retry).await?;
    reset_table::<Keyword>(dest, dimension, retry).await?;
    reset_table::<SchemaVersion>(dest, dimension, retry).await?;
    Ok(())
}

/// Create the table from a placeholder row, then delete it. The placeholder
/// fixes the schema, including the vector width.
async fn reset_table<R: TableRecord>(
    dest: &StorageAdapter,
    dimension: usize,
    retry: &RetryPolicy,
) -> Result<(), MigrationError> {
    if dest.drop_table(R::TABLE).await? {
        debug!(table = R::TABLE, "Dropped existing table");
    }

    let placeholder = R::placeholder(dimension);
    let row = to_row(&placeholder)?;
    let row = &row;
    retry
        .run("create table", move || {
            dest.create_table_with(R::TABLE, vec![row.clone()])
        })
        .await?;

    let filter = Filter::eq(R::ID_COLUMN, placeholder.id());
    let filter = &filter;
    retry
        .run("delete placeholder", move || dest.delete_where(R::TABLE, filter))
        .await?;
    Ok(())
}

/// Run one destination write on its own task, giving up after `limit`.
/// A write that times out may still land.
async fn bounded<T, F>(operation: &str, limit: Duration, write: F) -> Result<T, MigrationError>
where
    F: Future<Output = Result<T, MigrationError>> + Send + 'static,
    T: Send + 'static,
{
    run_bounded(operation, limit, write).await?
}

/// Append `rows` with retry, bounded by the phase timeout.
async fn append(
    dest: &Arc<StorageAdapter>,
    options: &MigrationOptions,
    table: &'static str,
    rows: Vec<Row>,
) -> Result<usize, MigrationError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let dest = Arc::clone(dest);
    let retry = options.retry;
    bounded(&format!("append to {}", table), options.phase_timeout, async move {
        let (dest, rows) = (&dest, &rows);
        retry
            .run(table, move || dest.append_rows(table, rows.clone()))
            .await
    })
    .await
}

/// Next page of a source stream, flattened. Empty at the end.
async fn next_page(reader: &mut RowReader, batch_size: usize) -> Result<Vec<Row>, MigrationError> {
    let page = reader.next_rows(batch_size).await?;
    Ok(page.into_iter().map(flatten).collect())
}

fn document_id(row: &Row) -> Option<String> {
    text(row, DOCUMENT_ID_FIELDS)
}

async fn collect_documents(
    source: &StorageAdapter,
    batch_size: usize,
    result: &mut MigrationResult,
) -> Result<BTreeMap<String, DocumentGroup>, MigrationError> {
    let mut groups: BTreeMap<String, DocumentGroup> = BTreeMap::new();
    let Some(mut reader) = source.stream_rows(tables::CHUNKS).await? else {
        debug!("Source has no chunks");
        return Ok(groups);
    };
    let mut sequence = 0u64;

    loop {
        let page = next_page(&mut reader, batch_size).await?;
        if page.is_empty() {
            break;
        }

        for mut row in page {
            sequence += 1;
            let Some(doc_id) = document_id(&row) else {
                result
                    .warnings
                    .push(format!("chunk row {} has no document id; skipped", sequence));
                continue;
            };
            let content = text(&row, CONTENT_FIELDS).unwrap_or_default();

            let group = groups.entry(doc_id).or_default();
            if group.chunk_count == 0 {
                for column in CONTENT_FIELDS.iter().chain(VECTOR_FIELDS) {
                    row.remove(*column);
                }
                group.metadata = row;
            }
            group.add_chunk_text(&content);
        }
    }
    debug!(documents = groups.len(), "Grouped source chunks");
    Ok(groups)
}

fn build_document(id: &str, group: &DocumentGroup, now: DateTime<Utc>) -> Document {
    let meta = &group.metadata;
    let source_url = text(meta, URL_FIELDS);
    let title = text(meta, &["title", "document_title"])
        .or_else(|| source_url.clone())
        .unwrap_or_else(|| id.to_string());
    let source_kind = text(meta, &["source_kind", "source_type", "source"]).unwrap_or_else(|| {
        if source_url.is_some() {
            "url".to_string()
        } else {
            "text".to_string()
        }
    });
    let created_at = timestamp(meta, &["created_at", "timestamp"]).unwrap_or(now);
    let updated_at = timestamp(meta, &["updated_at"]).unwrap_or(created_at);

    Document {
        id: id.to_string(),
        title,
        content_hash: group.content_hash(),
        source_kind,
        source_url,
        status: DocumentStatus::Active,
        chunk_count: group.chunk_count,
        code_block_count: 0,
        created_at,
        updated_at,
    }
}

/// Write documents with their tags and languages. Returns the
/// `(document, language)` pairs written.
async fn write_documents(
    dest: &Arc<StorageAdapter>,
    groups: &BTreeMap<String, DocumentGroup>,
    options: &MigrationOptions,
    result: &mut MigrationResult,
) -> Result<HashSet<(String, String)>, MigrationError> {
    let now = Utc::now();
    let mut languages_seen = HashSet::new();
    let entries: Vec<(&String, &DocumentGroup)> = groups.iter().collect();

    for batch in entries.chunks(options.batch_size) {
        let mut documents = Vec::with_capacity(batch.len());
        let mut tags = Vec::new();
        let mut languages = Vec::new();

        for (id, group) in batch {
            documents.push(to_row(&build_document(id, group, now))?);

            let mut tags_seen = HashSet::new();
            for tag in string_list(&group.metadata, &["tags", "tag"]) {
                let tag = DocumentTag::new(id.as_str(), &tag, Provenance::Manual);
                if !tag.tag.is_empty() && tags_seen.insert(tag.tag.clone()) {
                    tags.push(to_row(&tag)?);
                }
            }
            for language in string_list(&group.metadata, &["languages", "language"]) {
                let language = DocumentLanguage::new(id.as_str(), &language, Provenance::Manual);
                if languages_seen.insert((id.to_string(), language.language.clone())) {
                    languages.push(to_row(&language)?);
                }
            }
        }

        result.counts.documents += append(dest, options, tables::DOCUMENTS, documents).await?;
        result.counts.tags += append(dest, options, tables::DOCUMENT_TAGS, tags).await?;
        result.counts.languages += append(dest, options, tables::DOCUMENT_LANGUAGES, languages).await?;
    }
    Ok(languages_seen)
}

/// Embedding of a legacy row, or an empty vector with a warning when it is
/// unreadable or the wrong width.
fn migrate_vector(row: &Row, record: &str, dimension: usize, result: &mut MigrationResult) -> Vec<f32> {
    let cell = VECTOR_FIELDS
        .iter()
        .find_map(|name| row.get(*name).filter(|v| !v.is_null()));
    match convert_vector(cell) {
        Ok(vector) if vector.is_empty() || vector.len() == dimension => vector,
        Ok(vector) => {
            result.counts.dropped_vectors += 1;
            result.warnings.push(format!(
                "{}: embedding has {} dimensions, expected {}; dropped",
                record,
                vector.len(),
                dimension
            ));
            Vec::new()
        }
        Err(reason) => {
            result.counts.dropped_vectors += 1;
            result
                .warnings
                .push(format!("{}: {}; embedding dropped", record, reason));
            Vec::new()
        }
    }
}

async fn migrate_chunks(
    source: &StorageAdapter,
    dest: &Arc<StorageAdapter>,
    dimension: usize,
    options: &MigrationOptions,
    result: &mut MigrationResult,
) -> Result<(), MigrationError> {
    let Some(mut reader) = source.stream_rows(tables::CHUNKS).await? else {
        return Ok(());
    };
    let now = Utc::now();
    let mut cursors: HashMap<String, Cursor> = HashMap::new();

    loop {
        let page = next_page(&mut reader, options.batch_size).await?;
        if page.is_empty() {
            break;
        }

        let mut rows = Vec::with_capacity(page.len());
        for row in page {
            let Some(doc_id) = document_id(&row) else {
                continue;
            };
            let cursor = cursors.entry(doc_id.clone()).or_default();
            let content = text(&row, CONTENT_FIELDS).unwrap_or_default();

            let chunk_index = integer(&row, &["chunk_index", "index", "position"])
                .unwrap_or(cursor.next_index);
            cursor.next_index = cursor.next_index.max(chunk_index + 1);

            let start_offset = integer(&row, &["start_offset", "start"]).unwrap_or(cursor.next_offset);
            let end_offset = integer(&row, &["end_offset", "end"])
                .filter(|end| *end > start_offset)
                .unwrap_or(start_offset + (content.len() as u64).max(1));
            cursor.next_offset = end_offset;

            let id = text(&row, &["id", "chunk_id"])
                .unwrap_or_else(|| format!("{}:{}", doc_id, chunk_index));
            let embedding = migrate_vector(&row, &format!("chunk {}", id), dimension, result);

            let chunk = Chunk {
                id,
                document_id: doc_id,
                chunk_index: chunk_index as u32,
                start_offset,
                end_offset,
                content,
                embedding,
                context: text(&row, &["context"]),
                content_type: text(&row, &["content_type"]),
                source_url: text(&row, URL_FIELDS),
                created_at: timestamp(&row, &["created_at", "timestamp"]).unwrap_or(now),
            };
            rows.push(to_row(&chunk)?);
        }

        result.counts.chunks += append(dest, options, tables::CHUNKS, rows).await?;
    }
    Ok(())
}

async fn migrate_code_blocks(
    source: &StorageAdapter,
    dest: &Arc<StorageAdapter>,
    dimension: usize,
    options: &MigrationOptions,
    languages_seen: &mut HashSet<(String, String)>,
    result: &mut MigrationResult,
) -> Result<(), MigrationError> {
    let Some(mut reader) = source.stream_rows(tables::CODE_BLOCKS).await? else {
        debug!("Source has no code blocks");
        return Ok(());
    };

    let now = Utc::now();
    let mut next_index: HashMap<String, u64> = HashMap::new();
    let mut per_document: HashMap<String, u64> = HashMap::new();

    loop {
        let page = next_page(&mut reader, options.batch_size).await?;
        if page.is_empty() {
            break;
        }

        let mut rows = Vec::with_capacity(page.len());
        let mut languages = Vec::new();
        let mut touched: Vec<String> = Vec::new();

        for row in page {
            let content = text(&row, &["content", "code"]).unwrap_or_default();
            if content.trim().is_empty() {
                result.counts.skipped_code_blocks += 1;
                continue;
            }
            let Some(doc_id) = document_id(&row) else {
                result.counts.skipped_code_blocks += 1;
                result
                    .warnings
                    .push("code block without document id; skipped".to_string());
                continue;
            };

            let counter = next_index.entry(doc_id.clone()).or_insert(0);
            let block_index = integer(&row, &["block_index", "index"]).unwrap_or(*counter);
            *counter = (*counter).max(block_index + 1);

            let block_id = text(&row, &["block_id"]).unwrap_or_else(|| format!("block-{}", block_index));
            let id = text(&row, &["id"]).unwrap_or_else(|| format!("{}:{}", doc_id, block_id));
            let language =
                normalize_language(&text(&row, &["language", "lang"]).unwrap_or_default()).to_string();
            let embedding = migrate_vector(&row, &format!("code block {}", id), dimension, result);

            if languages_seen.insert((doc_id.clone(), language.clone())) {
                languages.push(to_row(&DocumentLanguage::new(
                    doc_id.as_str(),
                    &language,
                    Provenance::Generated,
                ))?);
            }
            *per_document.entry(doc_id.clone()).or_insert(0) += 1;
            if !touched.contains(&doc_id) {
                touched.push(doc_id.clone());
            }

            let block = CodeBlock {
                id,
                document_id: doc_id,
                block_id,
                block_index: block_index as u32,
                language,
                content,
                embedding,
                source_url: text(&row, URL_FIELDS),
                created_at: timestamp(&row, &["created_at", "timestamp"]).unwrap_or(now),
            };
            rows.push(to_row(&block)?);
        }

        result.counts.code_blocks += append(dest, options, tables::CODE_BLOCKS, rows).await?;
        result.counts.languages += append(dest, options, tables::DOCUMENT_LANGUAGES, languages).await?;

        for doc_id in touched {
            let count = per_document.get(&doc_id).copied().unwrap_or(0);
            let filter = Filter::eq("id", doc_id.as_str());
            let mut assignments = Row::new();
            assignments.insert("code_block_count".to_string(), Value::from(count));
            let dest = Arc::clone(dest);
            let retry = options.retry;
            bounded("update code block count", options.phase_timeout, async move {
                let (dest, filter, assignments) = (&dest, &filter, &assignments);
                retry
                    .run("update code block count", move || {
                        dest.update_where(tables::DOCUMENTS, filter, assignments)
                    })
                    .await
            })
            .await?;
        }
    }
    Ok(())
}

async fn write_keywords(
    dest: &Arc<StorageAdapter>,
    groups: &BTreeMap<String, DocumentGroup>,
    options: &MigrationOptions,
    result: &mut MigrationResult,
) -> Result<(), MigrationError> {
    let limit = options.keywords_per_source;
    let entries: Vec<(&String, &DocumentGroup)> = groups.iter().collect();

    for batch in entries.chunks(options.batch_size) {
        let mut rows = Vec::new();
        for (id, group) in batch {
            let title = text(&group.metadata, &["title", "document_title"]).unwrap_or_default();
            for (keyword, frequency) in top_keywords(&title, limit) {
                rows.push(to_row(&Keyword::new(id.as_str(), keyword, KeywordSource::Title, frequency))?);
            }
            for (keyword, frequency) in group.keywords.top(limit) {
                rows.push(to_row(&Keyword::new(
                    id.as_str(),
                    keyword,
                    KeywordSource::Content,
                    frequency,
                ))?);
            }
        }
        result.counts.keywords += append(dest, options, tables::KEYWORDS, rows).await?;
    }
    Ok(())
}

/// Index failures are warnings; exhaustive search still works without them.
async fn create_indexes(dest: &StorageAdapter, result: &mut MigrationResult) {
    for (table, columns) in SCALAR_INDEXES {
        for column in *columns {
            match dest.create_scalar_index(table, column).await {
                Ok(true) => result.counts.scalar_indexes += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(table, column, error = %e, "Scalar index creation failed");
                    result
                        .warnings
                        .push(format!("scalar index {}.{}: {}", table, column, e));
                }
            }
        }
    }

    for table in [tables::CHUNKS, tables::CODE_BLOCKS] {
        match dest.build_vector_index(table, EMBEDDING_COLUMN).await {
            IndexOutcome::Built { .. } => result.counts.vector_indexes_built += 1,
            IndexOutcome::TimedOut => {
                result.counts.vector_indexes_skipped += 1;
                result
                    .warnings
                    .push(format!("vector index on {} timed out", table));
            }
            IndexOutcome::Failed(reason) => {
                result.counts.vector_indexes_skipped += 1;
                result
                    .warnings
                    .push(format!("vector index on {} failed: {}", table, reason));
            }
            _ => result.counts.vector_indexes_skipped += 1,
        }
    }
    info!(
        scalar = result.counts.scalar_indexes,
        vector_built = result.counts.vector_indexes_built,
        vector_skipped = result.counts.vector_indexes_skipped,
        "Indexes created"
    );
}

/// Compare source and destination counts. `skipped_code_blocks` is the
/// number of empty source code blocks deliberately left behind.
pub async fn validate_migration(
    source: &StorageAdapter,
    dest: &StorageAdapter,
    skipped_code_blocks: usize,
) -> Result<ValidationReport, MigrationError> {
    let mut report = ValidationReport {
        source_chunks: source.count_rows(tables::CHUNKS).await?,
        dest_chunks: dest.count_rows(tables::CHUNKS).await?,
        source_code_blocks: None,
        dest_code_blocks: dest.count_rows(tables::CODE_BLOCKS).await?,
        dest_documents: dest.count_rows(tables::DOCUMENTS).await?,
        problems: Vec::new(),
    };
    if source.table_exists(tables::CODE_BLOCKS).await? {
        report.source_code_blocks = Some(source.count_rows(tables::CODE_BLOCKS).await?);
    }

    if report.source_chunks != report.dest_chunks {
        report.problems.push(format!(
            "chunk count mismatch: source {}, destination {}",
            report.source_chunks, report.dest_chunks
        ));
    }
    if let Some(source_blocks) = report.source_code_blocks {
        let expected = source_blocks.saturating_sub(skipped_code_blocks);
        if expected != report.dest_code_blocks {
            report.problems.push(format!(
                "code block count mismatch: expected {}, destination {}",
                expected, report.dest_code_blocks
            ));
        }
    }
    if report.dest_documents == 0 {
        report.problems.push("destination has no documents".to_string());
    }
    Ok(report)
}

/// Latest recorded schema version at `store`, if any.
pub async fn current_schema_version(
    store: &StorageAdapter,
) -> Result<Option<SchemaVersion>, MigrationError> {
    let rows = store
        .scan_rows(tables::SCHEMA_VERSION, &ScanOptions::default())
        .await?;
    let history = rows
        .into_iter()
        .map(from_row::<SchemaVersion>)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SchemaVersion::current(&history).cloned())
}

fn same_location(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

async fn close_quietly(store: &StorageAdapter, role: &str) {
    if let Err(e) = store.close().await {
        warn!(role, error = %e, "Failed to close store after migration");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_engine::EngineError;
    use docstore_storage::StoreError;
    use docstore_types::{content_hash, Settings};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    const DIM: usize = 4;

    fn config() -> AdapterConfig {
        let mut settings = Settings::default();
        settings.storage.embedding_dimension = DIM;
        AdapterConfig::from(&settings)
    }

    fn obj(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_prepare_schema_twice_leaves_empty_tables() {
        let temp = TempDir::new().unwrap();
        let dest = StorageAdapter::open(temp.path(), config()).await.unwrap();
        let retry = RetryPolicy::default();

        prepare_destination_schema(&dest, DIM, &retry).await.unwrap();
        dest.append_rows(tables::DOCUMENTS, vec![to_row(&Document::placeholder(DIM)).unwrap()])
            .await
            .unwrap();
        prepare_destination_schema(&dest, DIM, &retry).await.unwrap();

        for table in tables::ALL {
            assert!(dest.table_exists(table).await.unwrap(), "{} missing", table);
            assert_eq!(dest.count_rows(table).await.unwrap(), 0, "{} not empty", table);
        }
    }

    #[test]
    fn test_document_from_metadata() {
        let mut group = DocumentGroup {
            metadata: obj(json!({"title": "Guide", "url": "https://docs.rs", "created_at": 1_700_000_000})),
            ..DocumentGroup::default()
        };
        group.add_chunk_text("hello ");
        group.add_chunk_text("world");
        let doc = build_document("d1", &group, Utc::now());
        assert_eq!(doc.title, "Guide");
        assert_eq!(doc.source_kind, "url");
        assert_eq!(doc.source_url.as_deref(), Some("https://docs.rs"));
        assert_eq!(doc.chunk_count, 2);
        assert_eq!(doc.content_hash, content_hash("hello world"));
        assert_eq!(doc.created_at.timestamp(), 1_700_000_000);
        assert_eq!(doc.updated_at, doc.created_at);
    }

    #[test]
    fn test_document_title_falls_back() {
        let bare = DocumentGroup::default();
        let doc = build_document("d1", &bare, Utc::now());
        assert_eq!(doc.title, "d1");
        assert_eq!(doc.source_kind, "text");
    }

    #[test]
    fn test_wrong_width_vector_dropped_with_warning() {
        let temp = TempDir::new().unwrap();
        let mut result = MigrationResult::new(temp.path().to_path_buf(), false);

        let ok = obj(json!({"embedding": [1.0, 0.0, 0.0, 0.0]}));
        assert_eq!(migrate_vector(&ok, "c1", DIM, &mut result).len(), DIM);

        let short = obj(json!({"vector": [1.0, 0.0]}));
        assert!(migrate_vector(&short, "c2", DIM, &mut result).is_empty());

        let garbage = obj(json!({"embedding": "%%%"}));
        assert!(migrate_vector(&garbage, "c3", DIM, &mut result).is_empty());

        assert_eq!(result.counts.dropped_vectors, 2);
        assert_eq!(result.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_same_source_and_destination_rejected() {
        let temp = TempDir::new().unwrap();
        let migrator = Migrator::new(config());
        let err = migrator
            .migrate(temp.path(), temp.path(), &MigrationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidOptions(_)));
    }

    #[tokio::test]
    async fn test_missing_source_reported() {
        let temp = TempDir::new().unwrap();
        let migrator = Migrator::new(config());
        let result = migrator
            .migrate(
                &temp.path().join("absent"),
                &temp.path().join("dest"),
                &MigrationOptions::default(),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(!temp.path().join("dest").exists());
    }

    #[test]
    fn test_group_keywords_span_chunk_boundaries() {
        let mut group = DocumentGroup::default();
        for part in ["Caching query res", "ults speeds caching layers."] {
            group.add_chunk_text(part);
        }
        assert_eq!(
            group.keywords.top(10),
            top_keywords("Caching query results speeds caching layers.", 10)
        );
        assert_eq!(
            group.content_hash(),
            content_hash("Caching query results speeds caching layers.")
        );
    }

    /// Fails the first `conflicts` appends with a write conflict, then writes.
    struct ConflictingStore<'a> {
        inner: &'a StorageAdapter,
        conflicts: AtomicU32,
        attempts: AtomicU32,
    }

    impl ConflictingStore<'_> {
        async fn append_rows(&self, table: &str, rows: Vec<Row>) -> Result<usize, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Engine(EngineError::WriteConflict(
                    "concurrent commit".into(),
                )));
            }
            self.inner.append_rows(table, rows).await
        }
    }

    #[tokio::test]
    async fn test_conflicted_write_lands_once() {
        let temp = TempDir::new().unwrap();
        let dest = StorageAdapter::open(temp.path(), config()).await.unwrap();
        prepare_destination_schema(&dest, DIM, &RetryPolicy::default())
            .await
            .unwrap();

        let store = ConflictingStore {
            inner: &dest,
            conflicts: AtomicU32::new(2),
            attempts: AtomicU32::new(0),
        };
        let retry = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let row = to_row(&Chunk::new("d1", 0, 0, "only once", vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        let (store_ref, row_ref) = (&store, &row);

        let written = retry
            .run("append chunk", move || {
                store_ref.append_rows(tables::CHUNKS, vec![row_ref.clone()])
            })
            .await
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(dest.count_rows(tables::CHUNKS).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_write_past_deadline_is_reported() {
        let temp = TempDir::new().unwrap();
        let dest = Arc::new(StorageAdapter::open(temp.path(), config()).await.unwrap());
        let options = MigrationOptions {
            phase_timeout: Duration::from_nanos(1),
            ..MigrationOptions::default()
        };
        let rows = vec![to_row(&Document::placeholder(DIM)).unwrap()];

        let err = append(&dest, &options, tables::DOCUMENTS, rows)
            .await
            .unwrap_err();
        assert!(
            matches!(err, MigrationError::Store(StoreError::TimedOut { ref operation, .. }) if operation == "append to documents"),
            "unexpected error: {}",
            err
        );
    }
}
