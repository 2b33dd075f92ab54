//! Offline embeddings built with signed feature hashing over lowercase word
//! tokens. Deterministic for a given build, needs no network, and keeps
//! lexically similar texts close under cosine similarity.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::ServiceError;
use crate::providers::traits::EmbeddingProvider;

pub const DEFAULT_HASHING_DIMENSIONS: usize = 384;

#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimensions: usize,
    name: String,
}

impl HashingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            name: format!("feature-hashing-{}", dimensions.max(1)),
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let slot = (h % self.dimensions as u64) as usize;
            let sign = if h >> 63 == 1 { -1.0 } else { 1.0 };
            vector[slot] += sign;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
