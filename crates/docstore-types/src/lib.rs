//! # docstore-types
//!
//! Shared domain types for the docstore vector-store layer.
//!
//! This crate defines the records persisted by the storage adapter and the
//! migration engine:
//! - Documents: top-level ingested units
//! - Chunks and code blocks: embedded slices of a document
//! - Tags, languages and keywords: normalized document labels
//! - Schema versions: markers of the applied storage layout
//! - Settings: layered configuration for every component

pub mod config;
pub mod error;
pub mod hash;
pub mod language;
pub mod records;

pub use config::{
    CacheSettings, IndexSettings, MigrationSettings, PoolSettings, Settings, StorageSettings,
};
pub use error::DocstoreError;
pub use hash::{content_hash, ContentHasher};
pub use language::{normalize_language, LANGUAGE_VOCABULARY};
pub use records::{
    tables, Chunk, CodeBlock, Document, DocumentLanguage, DocumentStatus, DocumentTag, Keyword,
    KeywordSource, Provenance, SchemaVersion, TableRecord, PLACEHOLDER_ID,
};
