//! ============================================================================
//! Vector Index - Flat squared-euclidean nearest-neighbor search
//! ============================================================================
//! Append-only dense index over message embeddings:
//! - Vectors are stored contiguously; the slot is the insertion position
//! - Search is an exact full scan, nearest first, ties by lower slot
//! - Snapshots serialize the whole index for fast restart
//!
//! The index never deletes. It can always be rebuilt from the message store
//! by re-adding embeddings in slot order, yielding identical slots.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

use super::types::MemoryError;

/// One search result: which vector, and how far
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub slot: u64,
    /// Squared-euclidean distance to the query
    pub distance: f32,
}

/// Flat in-memory vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    dimension: usize,
    count: u64,
    /// Row-major vector data, `count * dimension` values
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            count: 0,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors; also the slot of the next append
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append a vector and return its slot
    pub fn add(&mut self, vector: &[f32]) -> Result<u64, MemoryError> {
        if vector.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let slot = self.count;
        self.data.extend_from_slice(vector);
        self.count += 1;
        Ok(slot)
    }

    /// Exact nearest-neighbor search, returning up to `k` hits nearest first.
    /// An empty index yields an empty result; a query of the wrong dimension
    /// is an error even then.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, MemoryError> {
        if query.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if self.count == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(slot, vector)| SearchHit {
                slot: slot as u64,
                distance: squared_l2(query, vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.slot.cmp(&b.slot))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Serialize the index to disk, replacing any previous snapshot
    pub fn save(&self, path: &Path) -> Result<(), MemoryError> {
        let bytes = bincode::serialize(self)?;
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load a previously saved snapshot
    pub fn load(path: &Path) -> Result<Self, MemoryError> {
        let bytes = std::fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

/// Squared euclidean distance between two equal-length vectors
pub(crate) fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
