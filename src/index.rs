//! Exact nearest-neighbour index over chunk embeddings.
//!
//! Vectors live in dense slots in insertion order. Search is a brute-force
//! scan, which keeps results exact and deterministic for the collection sizes a
//! single-user knowledge base reaches.

use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;

const VECTORS_FILE: &str = "vectors.bin";
const LAYOUT_FILE: &str = "index.json";

/// Distance metric, fixed when the index is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared Euclidean distance
    #[default]
    L2,
    /// Negated inner product, so that smaller is still nearer
    InnerProduct,
}

impl Metric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            Metric::InnerProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }

    /// Monotonic map from a raw distance to a relevance score where larger
    /// means more relevant.
    pub fn similarity(&self, distance: f32) -> f32 {
        match self {
            Metric::L2 => 1.0 / (1.0 + distance.max(0.0)),
            Metric::InnerProduct => -distance,
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l2" => Ok(Metric::L2),
            "ip" | "inner_product" => Ok(Metric::InnerProduct),
            other => Err(RagError::Config(format!(
                "unknown metric '{}': use l2 or inner_product",
                other
            ))),
        }
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub chunk_id: String,
    pub distance: f32,
}

#[derive(Serialize, Deserialize)]
struct IndexLayout {
    metric: Metric,
    dims: usize,
    chunk_ids: Vec<String>,
}

/// Chunk-id keyed vector store with a fixed metric and dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    metric: Metric,
    dims: usize,
    chunk_ids: Vec<String>,
    /// Row-major, `chunk_ids.len() * dims` values
    vectors: Vec<f32>,
}

impl VectorIndex {
    /// An index with no vectors. Searching it returns nothing.
    pub fn empty(metric: Metric, dims: usize) -> Self {
        VectorIndex {
            metric,
            dims,
            chunk_ids: Vec::new(),
            vectors: Vec::new(),
        }
    }

    /// Build a complete index from parallel lists of vectors and chunk ids.
    ///
    /// `dims` is the dimension every vector must have.
    pub fn build(
        metric: Metric,
        dims: usize,
        vectors: Vec<Embedding>,
        chunk_ids: Vec<String>,
    ) -> Result<Self> {
        if vectors.len() != chunk_ids.len() {
            return Err(RagError::Index(format!(
                "{} vectors for {} chunk ids",
                vectors.len(),
                chunk_ids.len()
            )));
        }

        let mut flat = Vec::with_capacity(vectors.len() * dims);
        for embedding in vectors {
            if embedding.dims() != dims {
                return Err(RagError::DimensionMismatch {
                    expected: dims,
                    actual: embedding.dims(),
                });
            }
            flat.extend(embedding.values);
        }

        debug!("Built {:?} index with {} vectors of dimension {}", metric, chunk_ids.len(), dims);
        Ok(VectorIndex {
            metric,
            dims,
            chunk_ids,
            vectors: flat,
        })
    }

    /// Replace the whole content. On error the current content is kept.
    pub fn replace(&mut self, vectors: Vec<Embedding>, chunk_ids: Vec<String>) -> Result<()> {
        *self = VectorIndex::build(self.metric, self.dims, vectors, chunk_ids)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    fn vector(&self, slot: usize) -> &[f32] {
        &self.vectors[slot * self.dims..(slot + 1) * self.dims]
    }

    /// The `k` nearest chunks, nearest first. Equal distances keep slot order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|slot| (slot, self.metric.distance(query, self.vector(slot))))
            .collect();
        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k.min(self.len()));

        Ok(scored
            .into_iter()
            .map(|(slot, distance)| Neighbor {
                chunk_id: self.chunk_ids[slot].clone(),
                distance,
            })
            .collect())
    }

    /// Write the index into `dir`: layout as JSON, vectors as little-endian f32.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let layout = IndexLayout {
            metric: self.metric,
            dims: self.dims,
            chunk_ids: self.chunk_ids.clone(),
        };
        fs::write(dir.join(LAYOUT_FILE), serde_json::to_vec_pretty(&layout)?)?;

        let mut bytes = Vec::with_capacity(self.vectors.len() * 4);
        for v in &self.vectors {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        fs::write(dir.join(VECTORS_FILE), bytes)?;
        Ok(())
    }

    /// Read an index previously written by [`VectorIndex::save`].
    pub fn load(dir: &Path) -> Result<Self> {
        let layout: IndexLayout = serde_json::from_slice(&fs::read(dir.join(LAYOUT_FILE))?)?;
        let bytes = fs::read(dir.join(VECTORS_FILE))?;

        let expected = layout.chunk_ids.len() * layout.dims * 4;
        if bytes.len() != expected {
            return Err(RagError::Persist(format!(
                "{} holds {} bytes, expected {}",
                VECTORS_FILE,
                bytes.len(),
                expected
            )));
        }

        let vectors = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(VectorIndex {
            metric: layout.metric,
            dims: layout.dims,
            chunk_ids: layout.chunk_ids,
            vectors,
        })
    }
}
