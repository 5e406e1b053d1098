//! Flat exact cosine index keyed by positional chunk id. An exhaustive scan
//! is sufficient at the target scale of a few thousand chunks; approximate
//! structures would only trade determinism for speed nobody needs here.

use crate::error::{RagError, Result};

pub struct FlatIndex {
    dims: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: Vec::new(),
        }
    }

    /// Append a vector; its positional index is the id. Dimensionality must
    /// match the index.
    pub fn add(&mut self, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dims {
            return Err(RagError::Index(format!(
                "vector has {} dims, index expects {}",
                vector.len(),
                self.dims
            )));
        }
        self.vectors.push(vector);
        Ok(())
    }

    /// Top-`k` ids by cosine similarity (clamped to [0, 1]), best first,
    /// ties broken by ascending id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>> {
        if query.len() != self.dims {
            return Err(RagError::Index(format!(
                "query has {} dims, index expects {}",
                query.len(),
                self.dims
            )));
        }
        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(u32, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u32, cosine_similarity(query, v).max(0.0)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a.sqrt() * mag_b.sqrt())
}
