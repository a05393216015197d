//! Vector index tuning from table size and vector width.

use std::time::Duration;

use docstore_engine::{DistanceMetric, VectorIndexKind, VectorIndexParams};
use docstore_types::IndexSettings;

use crate::error::StoreError;

/// Bounds for approximate index parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexTuning {
    /// Fewer vectors than this cannot train partitions
    pub min_trainable_rows: usize,
    pub min_partitions: usize,
    pub max_partitions: usize,
    /// Dimensions folded into one product-quantization sub-vector
    pub sub_vector_granularity: usize,
    pub min_sub_vectors: usize,
    pub max_sub_vectors: usize,
    pub build_timeout: Duration,
}

impl Default for IndexTuning {
    fn default() -> Self {
        Self::from(&IndexSettings::default())
    }
}

impl From<&IndexSettings> for IndexTuning {
    fn from(settings: &IndexSettings) -> Self {
        Self {
            min_trainable_rows: settings.min_trainable_rows,
            min_partitions: settings.min_partitions,
            max_partitions: settings.max_partitions,
            sub_vector_granularity: settings.sub_vector_granularity,
            min_sub_vectors: settings.min_sub_vectors,
            max_sub_vectors: settings.max_sub_vectors,
            build_timeout: Duration::from_millis(settings.build_timeout_ms),
        }
    }
}

/// What to do about a table's vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDecision {
    /// Too few rows to train; exhaustive search is used
    Skip { rows: usize, required: usize },
    Build(VectorIndexParams),
}

impl IndexTuning {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.min_partitions == 0 || self.min_partitions > self.max_partitions {
            return Err(StoreError::Config(format!(
                "invalid partition bounds {}..={}",
                self.min_partitions, self.max_partitions
            )));
        }
        if self.sub_vector_granularity == 0 {
            return Err(StoreError::Config("sub_vector_granularity must be > 0".into()));
        }
        if self.min_sub_vectors == 0 || self.min_sub_vectors > self.max_sub_vectors {
            return Err(StoreError::Config(format!(
                "invalid sub-vector bounds {}..={}",
                self.min_sub_vectors, self.max_sub_vectors
            )));
        }
        Ok(())
    }

    /// Decide index parameters for `rows` vectors of `dimension` floats.
    /// Pure: no I/O, no state.
    pub fn configure(&self, rows: usize, dimension: usize) -> IndexDecision {
        if rows < self.min_trainable_rows {
            return IndexDecision::Skip {
                rows,
                required: self.min_trainable_rows,
            };
        }

        let num_partitions = integer_sqrt(rows).clamp(self.min_partitions, self.max_partitions);
        let wanted = (dimension / self.sub_vector_granularity)
            .clamp(self.min_sub_vectors, self.max_sub_vectors);
        let num_sub_vectors = largest_divisor_at_most(dimension, wanted);

        IndexDecision::Build(VectorIndexParams {
            kind: VectorIndexKind::IvfPq,
            metric: DistanceMetric::Cosine,
            num_partitions,
            num_sub_vectors,
        })
    }
}

/// Product quantization splits each vector evenly, so the sub-vector count
/// must divide the dimension.
fn largest_divisor_at_most(dimension: usize, limit: usize) -> usize {
    (1..=limit.min(dimension).max(1))
        .rev()
        .find(|d| dimension % d == 0)
        .unwrap_or(1)
}

/// floor(sqrt(n))
fn integer_sqrt(n: usize) -> usize {
    let mut root = (n as f64).sqrt() as usize;
    while root.saturating_mul(root) > n {
        root -= 1;
    }
    while (root + 1).saturating_mul(root + 1) <= n {
        root += 1;
    }
    root
}
