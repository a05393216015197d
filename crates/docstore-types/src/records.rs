//! Records persisted in the docstore tables.
//!
//! Every record serializes to a flat JSON object; that object is the row
//! handed to the storage engine. Nested metadata never reaches a table:
//! the migration engine flattens legacy rows into these shapes first.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::DocstoreError;
use crate::language::normalize_language;

/// Logical table names, one per entity kind.
pub mod tables {
    pub const DOCUMENTS: &str = "documents";
    pub const CHUNKS: &str = "chunks";
    pub const CODE_BLOCKS: &str = "code_blocks";
    pub const DOCUMENT_TAGS: &str = "document_tags";
    pub const DOCUMENT_LANGUAGES: &str = "document_languages";
    pub const KEYWORDS: &str = "keywords";
    pub const SCHEMA_VERSION: &str = "schema_version";

    /// Every table of the normalized layout, in creation order.
    pub const ALL: &[&str] = &[
        DOCUMENTS,
        CHUNKS,
        CODE_BLOCKS,
        DOCUMENT_TAGS,
        DOCUMENT_LANGUAGES,
        KEYWORDS,
        SCHEMA_VERSION,
    ];
}

/// Id given to the rows that fix a table's column types at creation.
pub const PLACEHOLDER_ID: &str = "__placeholder__";

/// A record type that owns exactly one table.
pub trait TableRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table the record lives in.
    const TABLE: &'static str;

    /// Column holding [`TableRecord::id`].
    const ID_COLUMN: &'static str = "id";

    /// Primary identifier of the row.
    fn id(&self) -> &str;

    /// A fully-populated row used to infer column types (including the
    /// vector width) when the table is created. Deleted before real data
    /// is written.
    fn placeholder(dimension: usize) -> Self;
}

/// Lifecycle state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Active,
    Deleted,
}

/// Whether a label was supplied by a user or derived by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Manual,
    Generated,
}

/// Where a keyword was mined from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordSource {
    Title,
    Content,
}

/// A top-level ingested unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    /// Truncated digest of the concatenated chunk text
    pub content_hash: String,
    /// Origin of the document (`url`, `file`, `text`, ...)
    pub source_kind: String,
    pub source_url: Option<String>,
    pub status: DocumentStatus,
    pub chunk_count: u64,
    pub code_block_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TableRecord for Document {
    const TABLE: &'static str = tables::DOCUMENTS;

    fn id(&self) -> &str {
        &self.id
    }

    fn placeholder(_dimension: usize) -> Self {
        let now = Utc::now();
        Self {
            id: PLACEHOLDER_ID.to_string(),
            title: String::new(),
            content_hash: String::new(),
            source_kind: String::new(),
            source_url: Some(String::new()),
            status: DocumentStatus::Active,
            chunk_count: 0,
            code_block_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A contiguous slice of a document plus its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: u32,
    /// Byte offset of the first byte of the slice
    pub start_offset: u64,
    /// Byte offset one past the last byte of the slice
    pub end_offset: u64,
    pub content: String,
    /// Empty until the chunk has been embedded
    pub embedding: Vec<f32>,
    /// Surrounding text used to situate the chunk
    pub context: Option<String>,
    pub content_type: Option<String>,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(
        document_id: impl Into<String>,
        chunk_index: u32,
        start_offset: u64,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let content = content.into();
        let document_id = document_id.into();
        Self {
            id: format!("{}:{}", document_id, chunk_index),
            end_offset: start_offset + content.len() as u64,
            document_id,
            chunk_index,
            start_offset,
            content,
            embedding,
            context: None,
            content_type: None,
            source_url: None,
            created_at: Utc::now(),
        }
    }

    /// Set surrounding context (builder pattern).
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Check offsets and embedding width against the configured dimension.
    pub fn validate(&self, dimension: usize) -> Result<(), DocstoreError> {
        if self.start_offset >= self.end_offset {
            return Err(DocstoreError::InvalidRecord(format!(
                "chunk {} has empty or inverted offsets {}..{}",
                self.id, self.start_offset, self.end_offset
            )));
        }
        if !self.embedding.is_empty() && self.embedding.len() != dimension {
            return Err(DocstoreError::InvalidRecord(format!(
                "chunk {} embedding has {} dimensions, expected {}",
                self.id,
                self.embedding.len(),
                dimension
            )));
        }
        Ok(())
    }
}

impl TableRecord for Chunk {
    const TABLE: &'static str = tables::CHUNKS;

    fn id(&self) -> &str {
        &self.id
    }

    fn placeholder(dimension: usize) -> Self {
        Self {
            id: PLACEHOLDER_ID.to_string(),
            document_id: PLACEHOLDER_ID.to_string(),
            chunk_index: 0,
            start_offset: 0,
            end_offset: 1,
            content: String::new(),
            embedding: vec![0.0; dimension],
            context: Some(String::new()),
            content_type: Some(String::new()),
            source_url: Some(String::new()),
            created_at: Utc::now(),
        }
    }
}

/// An extracted source-code fragment with its own embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub id: String,
    pub document_id: String,
    /// Extractor-assigned identifier, stable within a document
    pub block_id: String,
    pub block_index: u32,
    /// Always one of [`crate::LANGUAGE_VOCABULARY`]
    pub language: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CodeBlock {
    pub fn new(
        document_id: impl Into<String>,
        block_index: u32,
        language: &str,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let document_id = document_id.into();
        let block_id = format!("block-{}", block_index);
        Self {
            id: format!("{}:{}", document_id, block_id),
            document_id,
            block_id,
            block_index,
            language: normalize_language(language).to_string(),
            content: content.into(),
            embedding,
            source_url: None,
            created_at: Utc::now(),
        }
    }

    /// Blocks whose content is only whitespace are never persisted.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

impl TableRecord for CodeBlock {
    const TABLE: &'static str = tables::CODE_BLOCKS;

    fn id(&self) -> &str {
        &self.id
    }

    fn placeholder(dimension: usize) -> Self {
        Self {
            id: PLACEHOLDER_ID.to_string(),
            document_id: PLACEHOLDER_ID.to_string(),
            block_id: String::new(),
            block_index: 0,
            language: String::new(),
            content: String::new(),
            embedding: vec![0.0; dimension],
            source_url: Some(String::new()),
            created_at: Utc::now(),
        }
    }
}

/// A case-folded tag attached to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTag {
    pub id: String,
    pub document_id: String,
    pub tag: String,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
}

impl DocumentTag {
    pub fn new(document_id: impl Into<String>, tag: &str, provenance: Provenance) -> Self {
        Self {
            id: Ulid::new().to_string(),
            document_id: document_id.into(),
            tag: tag.trim().to_lowercase(),
            provenance,
            created_at: Utc::now(),
        }
    }
}

impl TableRecord for DocumentTag {
    const TABLE: &'static str = tables::DOCUMENT_TAGS;

    fn id(&self) -> &str {
        &self.id
    }

    fn placeholder(_dimension: usize) -> Self {
        Self {
            id: PLACEHOLDER_ID.to_string(),
            document_id: PLACEHOLDER_ID.to_string(),
            tag: String::new(),
            provenance: Provenance::Manual,
            created_at: Utc::now(),
        }
    }
}

/// A normalized language attached to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentLanguage {
    pub id: String,
    pub document_id: String,
    pub language: String,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
}

impl DocumentLanguage {
    pub fn new(document_id: impl Into<String>, language: &str, provenance: Provenance) -> Self {
        Self {
            id: Ulid::new().to_string(),
            document_id: document_id.into(),
            language: normalize_language(language).to_string(),
            provenance,
            created_at: Utc::now(),
        }
    }
}

impl TableRecord for DocumentLanguage {
    const TABLE: &'static str = tables::DOCUMENT_LANGUAGES;

    fn id(&self) -> &str {
        &self.id
    }

    fn placeholder(_dimension: usize) -> Self {
        Self {
            id: PLACEHOLDER_ID.to_string(),
            document_id: PLACEHOLDER_ID.to_string(),
            language: String::new(),
            provenance: Provenance::Manual,
            created_at: Utc::now(),
        }
    }
}

/// A ranked keyword mined from a document's title or content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: String,
    pub document_id: String,
    pub keyword: String,
    pub source: KeywordSource,
    pub frequency: u32,
    pub created_at: DateTime<Utc>,
}

impl Keyword {
    pub fn new(
        document_id: impl Into<String>,
        keyword: impl Into<String>,
        source: KeywordSource,
        frequency: u32,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            document_id: document_id.into(),
            keyword: keyword.into(),
            source,
            frequency,
            created_at: Utc::now(),
        }
    }
}

impl TableRecord for Keyword {
    const TABLE: &'static str = tables::KEYWORDS;

    fn id(&self) -> &str {
        &self.id
    }

    fn placeholder(_dimension: usize) -> Self {
        Self {
            id: PLACEHOLDER_ID.to_string(),
            document_id: PLACEHOLDER_ID.to_string(),
            keyword: String::new(),
            source: KeywordSource::Content,
            frequency: 0,
            created_at: Utc::now(),
        }
    }
}

/// Marker of an applied storage layout generation.
///
/// The record with the latest `applied_at` is authoritative; older rows are
/// history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub version: String,
    pub applied_at: DateTime<Utc>,
    pub description: String,
}

impl SchemaVersion {
    pub fn new(version: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            applied_at: Utc::now(),
            description: description.into(),
        }
    }

    /// Pick the authoritative record out of the stored history.
    pub fn current(history: &[SchemaVersion]) -> Option<&SchemaVersion> {
        history.iter().max_by_key(|v| v.applied_at)
    }
}

impl TableRecord for SchemaVersion {
    const TABLE: &'static str = tables::SCHEMA_VERSION;
    const ID_COLUMN: &'static str = "version";

    fn id(&self) -> &str {
        &self.version
    }

    fn placeholder(_dimension: usize) -> Self {
        Self {
            version: PLACEHOLDER_ID.to_string(),
            applied_at: Utc::now(),
            description: String::new(),
        }
    }
}
