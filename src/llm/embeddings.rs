use log::debug;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ServiceError;
use crate::providers::traits::EmbeddingProvider;
use crate::providers::utils::{normalize, RetryPolicy};

/// Wraps an embedding backend with the policies shared by ingestion and
/// query time: per-call timeout, bounded retry, optional L2 normalisation,
/// a dimensionality check and an LRU cache for question embeddings.
pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
    normalize: bool,
    expected_dimensions: Option<usize>,
    retry: RetryPolicy,
    timeout: Duration,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl EmbeddingGenerator {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, normalize: bool) -> Self {
        Self {
            provider,
            normalize,
            expected_dimensions: None,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            cache: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy, timeout: Duration) -> Self {
        self.retry = retry;
        self.timeout = timeout;
        self
    }

    pub fn with_expected_dimensions(mut self, dimensions: Option<usize>) -> Self {
        self.expected_dimensions = dimensions;
        self
    }

    /// Capacity 0 disables the cache.
    pub fn with_query_cache(mut self, capacity: usize) -> Self {
        self.cache = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embeds a question in the same space as the indexed chunks.
    pub async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().get(text) {
                debug!("query embedding cache hit");
                return Ok(hit.clone());
            }
        }

        let provider = self.provider.as_ref();
        let timeout = self.timeout;
        let raw = self
            .retry
            .run("embedding query", move || async move {
                tokio::time::timeout(timeout, provider.embed_query(text))
                    .await
                    .map_err(|_| ServiceError::Timeout)?
            })
            .await?;
        let vector = self.finish(raw)?;

        if let Some(cache) = &self.cache {
            cache.lock().put(text.to_string(), vector.clone());
        }
        Ok(vector)
    }

    pub async fn generate_batch_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let provider = self.provider.as_ref();
        let timeout = self.timeout;
        let raw = self
            .retry
            .run("embedding batch", move || async move {
                tokio::time::timeout(timeout, provider.embed_documents(texts))
                    .await
                    .map_err(|_| ServiceError::Timeout)?
            })
            .await?;

        if raw.len() != texts.len() {
            return Err(ServiceError::InvalidResponse(format!(
                "received {} embeddings for {} texts",
                raw.len(),
                texts.len()
            )));
        }
        raw.into_iter().map(|v| self.finish(v)).collect()
    }

    fn finish(&self, mut vector: Vec<f32>) -> Result<Vec<f32>, ServiceError> {
        if vector.is_empty() {
            return Err(ServiceError::InvalidResponse("empty embedding".to_string()));
        }
        if let Some(expected) = self.expected_dimensions {
            if vector.len() != expected {
                return Err(ServiceError::InvalidResponse(format!(
                    "embedding has {} dimensions (expected {})",
                    vector.len(),
                    expected
                )));
            }
        }
        if self.normalize {
            normalize(&mut vector);
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 0.0, 0.0]).collect())
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn counting() -> Arc<CountingProvider> {
        Arc::new(CountingProvider { calls: AtomicUsize::new(0) })
    }

    #[tokio::test]
    async fn normalizes_when_enabled() {
        let generator = EmbeddingGenerator::new(counting(), true);
        let v = generator.generate_embedding("abcd").await.unwrap();
        assert_eq!(v, vec![1.0, 0.0, 0.0]);

        let raw = EmbeddingGenerator::new(counting(), false);
        assert_eq!(raw.generate_embedding("abcd").await.unwrap(), vec![4.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn caches_question_embeddings() {
        let provider = counting();
        let generator = EmbeddingGenerator::new(provider.clone(), true).with_query_cache(8);
        generator.generate_embedding("what is an agent?").await.unwrap();
        generator.generate_embedding("what is an agent?").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_unexpected_dimensions() {
        let generator = EmbeddingGenerator::new(counting(), true).with_expected_dimensions(Some(384));
        let err = generator.generate_embedding("x").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn batch_keeps_order() {
        let generator = EmbeddingGenerator::new(counting(), false);
        let texts = vec!["a".to_string(), "abc".to_string()];
        let vectors = generator.generate_batch_embeddings(&texts).await.unwrap();
        assert_eq!(vectors[0][0], 1.0);
        assert_eq!(vectors[1][0], 3.0);
    }
}
