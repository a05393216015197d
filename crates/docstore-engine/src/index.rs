//! Vector index parameters and their LanceDB index builders.

use lancedb::index::scalar::BTreeIndexBuilder;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::index::Index;
use lancedb::DistanceType;
use serde::{Deserialize, Serialize};

/// Requested approximate-index algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorIndexKind {
    IvfPq,
}

/// Distance used for similarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`, in [0, 2]
    #[default]
    Cosine,
}

impl DistanceMetric {
    pub(crate) fn to_lance(self) -> DistanceType {
        match self {
            DistanceMetric::Cosine => DistanceType::Cosine,
        }
    }
}

/// Tuning handed to `Engine::create_vector_index`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorIndexParams {
    pub kind: VectorIndexKind,
    pub metric: DistanceMetric,
    pub num_partitions: usize,
    pub num_sub_vectors: usize,
}

impl VectorIndexParams {
    pub(crate) fn to_index(self) -> Index {
        match self.kind {
            VectorIndexKind::IvfPq => Index::IvfPq(
                IvfPqIndexBuilder::default()
                    .distance_type(self.metric.to_lance())
                    .num_partitions(self.num_partitions as u32)
                    .num_sub_vectors(self.num_sub_vectors as u32),
            ),
        }
    }
}

pub(crate) fn scalar_index() -> Index {
    Index::BTree(BTreeIndexBuilder::default())
}
