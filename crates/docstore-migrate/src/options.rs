//! Migration options and reports.

use std::path::PathBuf;
use std::time::Duration;

use docstore_types::MigrationSettings;

use crate::error::MigrationError;
use crate::retry::RetryPolicy;

/// Version recorded after a successful migration
pub const TARGET_SCHEMA_VERSION: &str = "2.0.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Rows (or document groups) per destination write
    pub batch_size: usize,
    /// Only locate the source; touch nothing
    pub dry_run: bool,
    pub build_indexes: bool,
    pub validate: bool,
    pub retry: RetryPolicy,
    /// Deadline for each batch write and each vector index build. A batch
    /// that misses it fails the run.
    pub phase_timeout: Duration,
    pub schema_version: String,
    /// Keywords kept per document for each of title and content
    pub keywords_per_source: usize,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self::from(&MigrationSettings::default())
    }
}

impl From<&MigrationSettings> for MigrationOptions {
    fn from(settings: &MigrationSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            dry_run: false,
            build_indexes: true,
            validate: true,
            retry: RetryPolicy::from(settings),
            phase_timeout: Duration::from_millis(settings.phase_timeout_ms),
            schema_version: TARGET_SCHEMA_VERSION.to_string(),
            keywords_per_source: 10,
        }
    }
}

impl MigrationOptions {
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.batch_size == 0 {
            return Err(MigrationError::InvalidOptions("batch_size must be > 0".into()));
        }
        if self.phase_timeout.is_zero() {
            return Err(MigrationError::InvalidOptions("phase_timeout must be > 0".into()));
        }
        if self.schema_version.trim().is_empty() {
            return Err(MigrationError::InvalidOptions("schema_version is empty".into()));
        }
        Ok(())
    }
}

/// Rows and indexes written per entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationCounts {
    pub documents: usize,
    pub chunks: usize,
    pub code_blocks: usize,
    pub tags: usize,
    pub languages: usize,
    pub keywords: usize,
    pub scalar_indexes: usize,
    pub vector_indexes_built: usize,
    pub vector_indexes_skipped: usize,
    /// Empty code blocks left behind
    pub skipped_code_blocks: usize,
    /// Embeddings replaced by an empty vector
    pub dropped_vectors: usize,
}

/// Source vs destination row counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub source_chunks: usize,
    pub dest_chunks: usize,
    /// `None` when the source has no code-block table
    pub source_code_blocks: Option<usize>,
    pub dest_code_blocks: usize,
    pub dest_documents: usize,
    pub problems: Vec<String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.problems.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationResult {
    pub success: bool,
    pub dry_run: bool,
    /// Path actually read, which may be a backup of the requested source
    pub source_used: Option<PathBuf>,
    pub destination: PathBuf,
    pub counts: MigrationCounts,
    pub validation: Option<ValidationReport>,
    /// Version recorded in the destination, if any
    pub schema_version: Option<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub elapsed: Duration,
}

impl MigrationResult {
    pub(crate) fn new(destination: PathBuf, dry_run: bool) -> Self {
        Self {
            success: false,
            dry_run,
            source_used: None,
            destination,
            counts: MigrationCounts::default(),
            validation: None,
            schema_version: None,
            warnings: Vec::new(),
            errors: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}
