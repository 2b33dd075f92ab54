use log::info;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig, LlmProviderKind};
use crate::database::VectorIndex;
use crate::document::{ContentFilter, TextSplitter, WebLoader};
use crate::error::RagError;
use crate::ingest::{self, http_client_error, EmbedSettings, IngestionReport};
use crate::llm::{ChatClient, Pipeline, PromptTemplate};
use crate::providers::groq::GroqProvider;
use crate::providers::openai::OpenAIProvider;
use crate::providers::traits::CompletionProvider;
use crate::telemetry::RunTracer;

/// Everything a request needs, built once at startup and shared read-only
/// by all handlers.
pub struct RagContext {
    pipeline: Pipeline,
    report: Option<IngestionReport>,
}

impl RagContext {
    /// Fetches and indexes every source, then wires the pipeline. Nothing is
    /// served until this returns.
    pub async fn initialize(config: &AppConfig) -> Result<Self, RagError> {
        let template = match &config.prompt_template {
            Some(path) => PromptTemplate::load(path).await?,
            None => PromptTemplate::default(),
        };
        info!("Using prompt {} v{}", template.id, template.version);

        let embedder = ingest::embedding_generator(&config.embedding, config.retry, config.request_timeout)?;
        let chat = ChatClient::new(
            completion_provider(&config.llm, config.request_timeout)?,
            config.retry,
            config.request_timeout,
        );
        info!("Chat model: {} via {}", chat.model_name(), config.llm.provider.as_str());

        let filter = ContentFilter::from_classes(&config.source.content_classes)?;
        let loader = WebLoader::new(filter, config.request_timeout, config.retry).map_err(http_client_error)?;
        let splitter = TextSplitter::new(config.chunking);

        let (index, report) = ingest::ingest(
            &loader,
            &config.source.urls,
            &splitter,
            &embedder,
            EmbedSettings::from(&config.embedding),
        )
        .await?;

        let tracer = RunTracer::new(&config.run_tracing).map_err(http_client_error)?;
        if !tracer.is_enabled() {
            info!("Run tracing disabled");
        }

        let pipeline = Pipeline::new(
            Arc::new(index),
            Arc::new(embedder),
            Arc::new(chat),
            Arc::new(template),
            config.top_k,
        )
        .with_tracer(Arc::new(tracer));

        Ok(Self {
            pipeline,
            report: Some(report),
        })
    }

    /// Wraps an already-built pipeline.
    pub fn from_pipeline(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            report: None,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn index(&self) -> &VectorIndex {
        self.pipeline.index()
    }

    pub fn report(&self) -> Option<&IngestionReport> {
        self.report.as_ref()
    }
}

pub fn completion_provider(
    config: &LlmConfig,
    timeout: std::time::Duration,
) -> Result<Arc<dyn CompletionProvider>, RagError> {
    let provider: Arc<dyn CompletionProvider> = match config.provider {
        LlmProviderKind::Groq => Arc::new(
            GroqProvider::new(
                config.api_key.clone(),
                &config.api_url,
                config.model.clone(),
                config.temperature,
                timeout,
            )
            .map_err(http_client_error)?,
        ),
        LlmProviderKind::Openai => Arc::new(
            OpenAIProvider::new(
                &config.api_key,
                &config.api_url,
                config.model.clone(),
                config.temperature,
                timeout,
            )
            .map_err(http_client_error)?,
        ),
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn builds_configured_chat_provider() {
        let mut config = LlmConfig {
            provider: LlmProviderKind::Groq,
            model: "llama3-8b-8192".to_string(),
            api_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: "gsk-test".to_string(),
            temperature: 0.0,
        };
        let groq = completion_provider(&config, Duration::from_secs(1)).unwrap();
        assert_eq!(groq.model_name(), "llama3-8b-8192");

        config.provider = LlmProviderKind::Openai;
        config.model = "gpt-4o-mini".to_string();
        let openai = completion_provider(&config, Duration::from_secs(1)).unwrap();
        assert_eq!(openai.model_name(), "gpt-4o-mini");
    }
}
