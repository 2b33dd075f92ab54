use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;

use crate::document::Chunk;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("entry {index} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("query vector has {actual} dimensions, index holds {expected}")]
    QueryDimension { expected: usize, actual: usize },
    #[error("entry {0} has an empty vector")]
    EmptyVector(usize),
}

/// A chunk and its embedding.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Arc<Chunk>,
    pub vector: Vec<f32>,
}

impl IndexEntry {
    pub fn new(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            chunk: Arc::new(chunk),
            vector,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Arc<Chunk>,
    pub score: f32,
    /// 1-based similarity rank.
    pub rank: usize,
}

/// Read-only exact nearest-neighbour index over cosine similarity.
///
/// Built once from a finite set of entries; there are no mutation
/// operations, so shared references can be queried concurrently.
#[derive(Debug, Default)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    norms: Vec<f32>,
    dimensions: usize,
}

impl VectorIndex {
    pub fn build(entries: Vec<IndexEntry>) -> Result<Self, IndexError> {
        let dimensions = entries.first().map(|e| e.vector.len()).unwrap_or(0);
        for (index, entry) in entries.iter().enumerate() {
            if entry.vector.is_empty() {
                return Err(IndexError::EmptyVector(index));
            }
            if entry.vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    index,
                    expected: dimensions,
                    actual: entry.vector.len(),
                });
            }
        }
        let norms = entries.iter().map(|e| l2_norm(&e.vector)).collect();

        Ok(Self {
            entries,
            norms,
            dimensions,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimensionality shared by every entry; 0 for an empty index.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// The `k` entries most similar to `vector`, nearest first. Equal scores
    /// keep insertion order, so identical queries always return identical
    /// results.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimensions {
            return Err(IndexError::QueryDimension {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }

        let query_norm = l2_norm(vector);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (entry, norm))| (i, cosine(vector, query_norm, &entry.vector, *norm)))
            .collect();

        scored.sort_by(|a, b| rank_order(a, b));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(rank, (i, score))| SearchHit {
                chunk: Arc::clone(&self.entries[i].chunk),
                score,
                rank: rank + 1,
            })
            .collect())
    }
}

fn rank_order(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a_norm <= f32::EPSILON || b_norm <= f32::EPSILON {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let score = dot / (a_norm * b_norm);
    if score.is_nan() {
        0.0
    } else {
        score
    }
}
