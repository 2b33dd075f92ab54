use futures::stream::{self, StreamExt, TryStreamExt};
use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::database::{IndexEntry, VectorIndex};
use crate::document::{Chunk, Document, TextSplitter, WebLoader};
use crate::error::{ConfigError, RagError, ServiceError};
use crate::llm::EmbeddingGenerator;
use crate::providers::hashing::DEFAULT_HASHING_DIMENSIONS;
use crate::providers::huggingface::HuggingFaceProvider;
use crate::providers::openai::OpenAIEmbeddingProvider;
use crate::providers::traits::EmbeddingProvider;
use crate::providers::{HashingProvider, RetryPolicy};

/// Summary of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionReport {
    pub documents: usize,
    pub characters: usize,
    pub chunks: usize,
    pub dimensions: usize,
    pub elapsed: Duration,
}

/// Batching knobs for embedding the chunks.
#[derive(Debug, Clone, Copy)]
pub struct EmbedSettings {
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            concurrency: 4,
        }
    }
}

impl From<&EmbeddingConfig> for EmbedSettings {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            concurrency: config.concurrency,
        }
    }
}

/// Builds the configured embedding backend.
pub fn embedding_provider(
    config: &EmbeddingConfig,
    timeout: Duration,
) -> Result<Arc<dyn EmbeddingProvider>, RagError> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingProviderKind::Huggingface => Arc::new(
            HuggingFaceProvider::new(
                config.model.clone(),
                config.api_key.clone(),
                config.api_url.as_deref(),
                timeout,
            )
            .map_err(http_client_error)?,
        ),
        EmbeddingProviderKind::Openai => {
            let api_key = config
                .api_key
                .as_deref()
                .ok_or(ConfigError::MissingSecret("OPENAI_API_KEY"))?;
            Arc::new(
                OpenAIEmbeddingProvider::new(
                    api_key,
                    config.api_url.as_deref().unwrap_or("https://api.openai.com/v1"),
                    config.model.clone(),
                    timeout,
                )
                .map_err(http_client_error)?,
            )
        }
        EmbeddingProviderKind::Hashing => Arc::new(HashingProvider::new(
            config.dimensions.unwrap_or(DEFAULT_HASHING_DIMENSIONS),
        )),
    };
    Ok(provider)
}

/// Wraps the provider with the retry, normalisation and cache policies.
pub fn embedding_generator(
    config: &EmbeddingConfig,
    retry: RetryPolicy,
    timeout: Duration,
) -> Result<EmbeddingGenerator, RagError> {
    let provider = embedding_provider(config, timeout)?;
    Ok(EmbeddingGenerator::new(provider, config.normalize)
        .with_retry(retry, timeout)
        .with_expected_dimensions(config.dimensions)
        .with_query_cache(config.query_cache_size))
}

pub(crate) fn http_client_error(e: ServiceError) -> ConfigError {
    ConfigError::Invalid {
        name: "http_client",
        reason: e.to_string(),
    }
}

/// Chunks and embeds already-loaded documents into a fresh index.
///
/// Chunks are embedded in batches with up to `concurrency` requests in
/// flight; results are reassembled in chunk order.
pub async fn index_documents(
    documents: &[Document],
    splitter: &TextSplitter,
    embedder: &EmbeddingGenerator,
    settings: EmbedSettings,
) -> Result<VectorIndex, RagError> {
    let chunks: Vec<Chunk> = splitter.split(documents).collect();
    info!(
        "Split {} documents into {} chunks (size {}, overlap {})",
        documents.len(),
        chunks.len(),
        splitter.config().chunk_size(),
        splitter.config().chunk_overlap()
    );

    let batches: Vec<Vec<String>> = chunks
        .chunks(settings.batch_size.max(1))
        .map(|batch| batch.iter().map(|c| c.text.clone()).collect())
        .collect();

    let embedded: Vec<Vec<Vec<f32>>> = stream::iter(batches.iter())
        .map(|batch| embedder.generate_batch_embeddings(batch))
        .buffered(settings.concurrency.max(1))
        .try_collect()
        .await
        .map_err(RagError::EmbeddingService)?;

    let vectors: Vec<Vec<f32>> = embedded.into_iter().flatten().collect();
    if vectors.len() != chunks.len() {
        return Err(RagError::EmbeddingService(ServiceError::InvalidResponse(format!(
            "embedded {} of {} chunks",
            vectors.len(),
            chunks.len()
        ))));
    }

    let entries = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| IndexEntry::new(chunk, vector))
        .collect();
    Ok(VectorIndex::build(entries)?)
}

/// Fetches, filters, chunks and embeds every source. Any failure aborts the
/// whole run; there is no partially built index.
pub async fn ingest(
    loader: &WebLoader,
    urls: &[url::Url],
    splitter: &TextSplitter,
    embedder: &EmbeddingGenerator,
    settings: EmbedSettings,
) -> Result<(VectorIndex, IngestionReport), RagError> {
    let started = Instant::now();
    let documents = loader.load(urls).await?;
    let characters: usize = documents
        .iter()
        .map(|d| d.page_content.chars().count())
        .sum();

    let index = index_documents(&documents, splitter, embedder, settings).await?;
    let report = IngestionReport {
        documents: documents.len(),
        characters,
        chunks: index.len(),
        dimensions: index.dimensions(),
        elapsed: started.elapsed(),
    };
    info!(
        "Indexed {} chunks ({} dimensions, model {}) from {} documents in {:.2?}",
        report.chunks,
        report.dimensions,
        embedder.model_name(),
        report.documents,
        report.elapsed
    );
    Ok((index, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ContentFilter;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use axum::{response::Html, routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use url::Url;

    fn documents() -> Vec<Document> {
        vec![
            Document::new(
                "Planning. Subgoal and decomposition: the agent breaks down large tasks into smaller subgoals. \
                 Reflection and refinement: the agent does self-criticism over past actions.",
                "https://example.com/agent",
            ),
            Document::new(
                "Memory. Short-term memory is in-context learning. Long-term memory uses an external vector store.",
                "https://example.com/memory",
            ),
        ]
    }

    struct CountingProvider {
        batches: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn reingesting_is_idempotent() {
        let splitter = TextSplitter::with_sizes(60, 10).unwrap();
        let embedder = EmbeddingGenerator::new(Arc::new(HashingProvider::new(128)), true);
        let settings = EmbedSettings { batch_size: 3, concurrency: 2 };

        let first = index_documents(&documents(), &splitter, &embedder, settings).await.unwrap();
        let second = index_documents(&documents(), &splitter, &embedder, settings).await.unwrap();

        assert_eq!(first.len(), second.len());
        assert_eq!(first.len(), splitter.split(&documents()).count());
        for (a, b) in first.entries().iter().zip(second.entries()) {
            assert_eq!(a.chunk, b.chunk);
            assert_eq!(a.vector, b.vector);
        }
    }

    #[tokio::test]
    async fn batches_keep_chunk_order() {
        let provider = Arc::new(CountingProvider { batches: AtomicUsize::new(0) });
        let splitter = TextSplitter::with_sizes(40, 5).unwrap();
        let embedder = EmbeddingGenerator::new(provider.clone(), false);
        let settings = EmbedSettings { batch_size: 2, concurrency: 3 };

        let index = index_documents(&documents(), &splitter, &embedder, settings).await.unwrap();
        let chunks = index.len();
        assert_eq!(provider.batches.load(Ordering::SeqCst), (chunks + 1) / 2);
        for entry in index.entries() {
            assert_eq!(entry.vector[0], entry.chunk.text.len() as f32);
        }
    }

    #[tokio::test]
    async fn no_documents_gives_empty_index() {
        let splitter = TextSplitter::with_sizes(60, 10).unwrap();
        let embedder = EmbeddingGenerator::new(Arc::new(HashingProvider::new(16)), true);
        let index = index_documents(&[], &splitter, &embedder, EmbedSettings::default()).await.unwrap();
        assert!(index.is_empty());
    }

    fn loader() -> WebLoader {
        let filter = ContentFilter::from_classes(&["post-content".to_string()]).unwrap();
        WebLoader::new(filter, Duration::from_secs(2), RetryPolicy::none()).unwrap()
    }

    /// Serves `html` at `/post` on an ephemeral local port.
    async fn serve_page(html: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/post", get(move || async move { Html(html) }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{}/post", addr)).unwrap()
    }

    #[tokio::test]
    async fn unreachable_source_aborts_ingestion() {
        let provider = Arc::new(CountingProvider { batches: AtomicUsize::new(0) });
        let embedder = EmbeddingGenerator::new(provider.clone(), false);
        let splitter = TextSplitter::with_sizes(60, 10).unwrap();
        let urls = [Url::parse("http://127.0.0.1:1/").unwrap()];

        let err = ingest(&loader(), &urls, &splitter, &embedder, EmbedSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Fetch(FetchError::Unreachable { .. })));
        assert_eq!(provider.batches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn page_without_matching_content_aborts_ingestion() {
        let url = serve_page(
            "<html><head><title>Agents</title></head>\
             <body><div class=\"sidebar\">navigation only</div></body></html>",
        )
        .await;
        let provider = Arc::new(CountingProvider { batches: AtomicUsize::new(0) });
        let embedder = EmbeddingGenerator::new(provider.clone(), false);
        let splitter = TextSplitter::with_sizes(60, 10).unwrap();

        let err = ingest(&loader(), &[url.clone()], &splitter, &embedder, EmbedSettings::default())
            .await
            .unwrap_err();
        match err {
            RagError::Fetch(FetchError::EmptyDocument(source)) => assert_eq!(source, url.to_string()),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(provider.batches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn matching_page_is_indexed() {
        let url = serve_page(
            "<html><body><div class=\"post-content\">\
             Task decomposition breaks a complicated task into smaller subgoals.</div></body></html>",
        )
        .await;
        let embedder = EmbeddingGenerator::new(Arc::new(HashingProvider::new(32)), true);
        let splitter = TextSplitter::with_sizes(60, 10).unwrap();

        let (index, report) = ingest(&loader(), &[url], &splitter, &embedder, EmbedSettings::default())
            .await
            .unwrap();
        assert_eq!(report.documents, 1);
        assert!(report.chunks > 0);
        assert_eq!(index.len(), report.chunks);
        assert_eq!(report.dimensions, 32);
    }

    #[test]
    fn hashing_provider_needs_no_credentials() {
        let config = EmbeddingConfig {
            provider: EmbeddingProviderKind::Hashing,
            model: "unused".to_string(),
            normalize: true,
            dimensions: Some(64),
            api_url: None,
            api_key: None,
            batch_size: 8,
            concurrency: 1,
            query_cache_size: 0,
        };
        let provider = embedding_provider(&config, Duration::from_secs(1)).unwrap();
        assert_eq!(provider.model_name(), "feature-hashing-64");
    }
}
