//! Flat exact nearest-neighbour index under squared Euclidean distance.
//!
//! Vectors are stored row-major in one contiguous buffer. Row `i` of the index
//! corresponds to entry `i` of the chunk list it was built alongside.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{RagError, Result};
use crate::protocol::Embedding;

/// One search result: the row of the matching vector and its distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub row: usize,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    dim: usize,
    data: Vec<f32>,
}

/// Squared L2 distance. Slices must have equal length.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

impl VectorIndex {
    /// Build an index from equal-length vectors. Empty input, zero-length
    /// vectors and ragged dimensions are rejected.
    pub fn build(vectors: Vec<Embedding>) -> Result<Self> {
        let Some(first) = vectors.first() else {
            return Err(RagError::InvalidIndex("no vectors to index".to_string()));
        };
        let dim = first.len();
        if dim == 0 {
            return Err(RagError::InvalidIndex("vectors have zero dimension".to_string()));
        }

        let mut data = Vec::with_capacity(dim * vectors.len());
        for (row, vector) in vectors.into_iter().enumerate() {
            if vector.len() != dim {
                return Err(RagError::InvalidIndex(format!(
                    "row {} has dimension {}, expected {}",
                    row,
                    vector.len(),
                    dim
                )));
            }
            data.extend(vector);
        }

        Ok(Self { dim, data })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vector_at(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    /// Storage is well formed: non-zero dimension and a whole number of rows.
    /// Deserialized snapshots are checked with this before use.
    pub fn is_consistent(&self) -> bool {
        self.dim > 0 && self.data.len() % self.dim == 0
    }

    /// The `min(k, len)` nearest rows, ascending by distance, ties by row.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if k == 0 || self.is_empty() {
            return Vec::new();
        }
        if query.len() != self.dim {
            tracing::warn!(
                "Query vector has dimension {}, index expects {}",
                query.len(),
                self.dim
            );
            return Vec::new();
        }

        let mut hits: Vec<SearchHit> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(row, vector)| SearchHit {
                row,
                distance: squared_l2(query, vector),
            })
            .collect();

        // NaN distances of either sign rank after every number.
        hits.sort_by(|a, b| {
            a.distance
                .is_nan()
                .cmp(&b.distance.is_nan())
                .then_with(|| match (a.distance.is_nan(), b.distance.is_nan()) {
                    (true, true) => Ordering::Equal,
                    _ => a.distance.total_cmp(&b.distance),
                })
                .then(a.row.cmp(&b.row))
        });
        hits.truncate(k);
        hits
    }
}
