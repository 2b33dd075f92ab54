use clap::{ArgAction, Parser, ValueEnum};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;
use crate::providers::utils::RetryPolicy;

pub const DEFAULT_SOURCE_URL: &str = "https://lilianweng.github.io/posts/2023-06-23-agent/";
pub const DEFAULT_EMBEDDING_MODEL: &str = "BAAI/bge-small-en-v1.5";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rag-agent-api",
    author,
    version,
    about = "Question answering over a web document with retrieval-augmented generation"
)]
pub struct Args {
    /// Address the HTTP server binds to (host:port).
    #[arg(long, env = "RAG_BIND", default_value = "127.0.0.1:8000")]
    pub bind: String,

    /// Document to ingest at startup. Repeat for several documents.
    #[arg(long = "source-url", env = "RAG_SOURCE_URLS", value_delimiter = ',', default_value = DEFAULT_SOURCE_URL)]
    pub source_urls: Vec<String>,

    /// CSS classes whose elements are kept when extracting document text.
    #[arg(
        long = "content-class",
        env = "RAG_CONTENT_CLASSES",
        value_delimiter = ',',
        default_value = "post-content,post-title,post-header"
    )]
    pub content_classes: Vec<String>,

    /// Maximum chunk length in characters.
    #[arg(long, env = "RAG_CHUNK_SIZE", default_value_t = 1000)]
    pub chunk_size: usize,

    /// Characters shared between neighbouring chunks.
    #[arg(long, env = "RAG_CHUNK_OVERLAP", default_value_t = 200)]
    pub chunk_overlap: usize,

    #[arg(long, env = "RAG_EMBEDDING_PROVIDER", value_enum, default_value_t = EmbeddingProviderKind::Huggingface)]
    pub embedding_provider: EmbeddingProviderKind,

    #[arg(long, env = "RAG_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    /// L2-normalise every embedding before it is stored or compared.
    #[arg(long, env = "RAG_NORMALIZE_EMBEDDINGS", default_value_t = true, action = ArgAction::Set)]
    pub normalize_embeddings: bool,

    /// Expected embedding dimensionality. Checked against every vector when
    /// set; the hashing provider uses it as its width (384 when unset).
    #[arg(long, env = "RAG_EMBEDDING_DIMENSIONS")]
    pub embedding_dimensions: Option<usize>,

    /// Override for the embedding service base URL.
    #[arg(long, env = "RAG_EMBEDDING_API_URL")]
    pub embedding_api_url: Option<String>,

    /// Chunks sent per embedding request during ingestion.
    #[arg(long, env = "RAG_EMBEDDING_BATCH_SIZE", default_value_t = 32)]
    pub embedding_batch_size: usize,

    /// Embedding requests in flight during ingestion.
    #[arg(long, env = "RAG_EMBEDDING_CONCURRENCY", default_value_t = 4)]
    pub embedding_concurrency: usize,

    /// Cached question embeddings (0 disables caching).
    #[arg(long, env = "RAG_QUERY_CACHE_SIZE", default_value_t = 256)]
    pub query_cache_size: usize,

    #[arg(long, env = "RAG_LLM_PROVIDER", value_enum, default_value_t = LlmProviderKind::Groq)]
    pub llm_provider: LlmProviderKind,

    #[arg(long, env = "RAG_LLM_MODEL", default_value = "llama3-8b-8192")]
    pub llm_model: String,

    /// JSON prompt template file; the built-in rlm/rag-prompt is used when absent.
    #[arg(long, env = "RAG_PROMPT_TEMPLATE")]
    pub prompt_template: Option<PathBuf>,

    /// Chunks retrieved per question.
    #[arg(long, env = "RAG_TOP_K", default_value_t = 4)]
    pub top_k: usize,

    /// Hard timeout for every outbound HTTP request.
    #[arg(long, env = "RAG_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Attempts per external call, including the first one.
    #[arg(long, env = "RAG_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: usize,

    #[arg(long, env = "RAG_MAX_CONCURRENT_REQUESTS", default_value_t = 64)]
    pub max_concurrent_requests: usize,

    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// Key for the run-tracing service.
    #[arg(long, env = "LANGCHAIN_API_KEY", hide_env_values = true)]
    pub langchain_api_key: Option<String>,

    #[arg(long, env = "LANGCHAIN_ENDPOINT", default_value = "https://api.smith.langchain.com")]
    pub langchain_endpoint: String,

    #[arg(long, env = "LANGCHAIN_PROJECT", default_value = "default")]
    pub langchain_project: String,

    /// Keep the tracing key requirement but never upload runs.
    #[arg(long, env = "RAG_DISABLE_RUN_TRACING")]
    pub disable_run_tracing: bool,

    /// Answer a single question on stdout instead of serving HTTP.
    #[arg(long)]
    pub question: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbeddingProviderKind {
    Huggingface,
    Openai,
    Hashing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LlmProviderKind {
    Groq,
    Openai,
}

impl LlmProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProviderKind::Groq => "groq",
            LlmProviderKind::Openai => "openai",
        }
    }

    fn key_var(&self) -> &'static str {
        match self {
            LlmProviderKind::Groq => "GROQ_API_KEY",
            LlmProviderKind::Openai => "OPENAI_API_KEY",
        }
    }
}

/// Endpoint defaults for a chat provider, overridable through
/// `<PROVIDER>_API_URL` and `<PROVIDER>_TEMPERATURE`.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_url: String,
    pub temperature: f32,
}

impl ProviderConfig {
    pub fn from_env(provider: &str) -> Self {
        let prefix = provider.to_uppercase();

        let api_url = env::var(format!("{}_API_URL", prefix))
            .unwrap_or_else(|_| match provider {
                "groq" => "https://api.groq.com/openai/v1".to_string(),
                "openai" => "https://api.openai.com/v1".to_string(),
                _ => String::new()
            });

        let temperature = env::var(format!("{}_TEMPERATURE", prefix))
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0.7);

        Self {
            api_url,
            temperature,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub urls: Vec<Url>,
    pub content_classes: Vec<String>,
}

/// Validated chunk sizes. Only `ChunkingConfig::new` can build one, so
/// `chunk_overlap < chunk_size` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::ChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ConfigError::ChunkOverlap {
                chunk_size,
                overlap: chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub normalize: bool,
    pub dimensions: Option<usize>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub concurrency: usize,
    pub query_cache_size: usize,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub model: String,
    pub api_url: String,
    pub api_key: String,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct RunTracingConfig {
    pub api_key: String,
    pub endpoint: String,
    pub project: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub source: SourceConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub prompt_template: Option<PathBuf>,
    pub top_k: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_concurrent_requests: usize,
    pub run_tracing: RunTracingConfig,
}

impl AppConfig {
    /// Validates everything fixed at startup. Any failure here aborts the
    /// process before ingestion starts.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let bind = args.bind.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            name: "bind",
            reason: e.to_string(),
        })?;

        let source = SourceConfig {
            urls: parse_urls(&args.source_urls)?,
            content_classes: parse_classes(&args.content_classes)?,
        };
        let chunking = ChunkingConfig::new(args.chunk_size, args.chunk_overlap)?;

        let llm_key = match args.llm_provider {
            LlmProviderKind::Groq => args.groq_api_key.clone(),
            LlmProviderKind::Openai => args.openai_api_key.clone(),
        };
        let llm_api_key = require_secret(llm_key, args.llm_provider.key_var())?;
        let tracing_key = require_secret(args.langchain_api_key.clone(), "LANGCHAIN_API_KEY")?;

        let embedding_key = match args.embedding_provider {
            EmbeddingProviderKind::Openai => Some(require_secret(
                args.openai_api_key.clone(),
                "OPENAI_API_KEY",
            )?),
            EmbeddingProviderKind::Huggingface => args.hf_token.clone().filter(|t| !t.trim().is_empty()),
            EmbeddingProviderKind::Hashing => None,
        };

        positive("embedding_batch_size", args.embedding_batch_size)?;
        positive("embedding_concurrency", args.embedding_concurrency)?;
        positive("top_k", args.top_k)?;
        positive("max_attempts", args.max_attempts)?;
        positive("max_concurrent_requests", args.max_concurrent_requests)?;
        if args.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "request_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if let Some(dims) = args.embedding_dimensions {
            positive("embedding_dimensions", dims)?;
        }
        if args.embedding_model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "embedding_model",
                reason: "must not be empty".to_string(),
            });
        }

        let provider = ProviderConfig::from_env(args.llm_provider.as_str());

        Ok(Self {
            bind,
            source,
            chunking,
            embedding: EmbeddingConfig {
                provider: args.embedding_provider,
                model: args.embedding_model.clone(),
                normalize: args.normalize_embeddings,
                dimensions: args.embedding_dimensions,
                api_url: args.embedding_api_url.clone(),
                api_key: embedding_key,
                batch_size: args.embedding_batch_size,
                concurrency: args.embedding_concurrency,
                query_cache_size: args.query_cache_size,
            },
            llm: LlmConfig {
                provider: args.llm_provider,
                model: args.llm_model.clone(),
                api_url: provider.api_url,
                api_key: llm_api_key,
                temperature: provider.temperature,
            },
            prompt_template: args.prompt_template.clone(),
            top_k: args.top_k,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            retry: RetryPolicy {
                max_attempts: args.max_attempts,
                ..RetryPolicy::default()
            },
            max_concurrent_requests: args.max_concurrent_requests,
            run_tracing: RunTracingConfig {
                api_key: tracing_key,
                endpoint: args.langchain_endpoint.trim_end_matches('/').to_string(),
                project: args.langchain_project.clone(),
                enabled: !args.disable_run_tracing,
            },
        })
    }
}

pub fn require_secret(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::MissingSecret(name)),
    }
}

fn positive(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn parse_urls(raw: &[String]) -> Result<Vec<Url>, ConfigError> {
    let urls = raw
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            let url = Url::parse(s).map_err(|e| ConfigError::InvalidUrl {
                url: s.to_string(),
                reason: e.to_string(),
            })?;
            match url.scheme() {
                "http" | "https" => Ok(url),
                other => Err(ConfigError::InvalidUrl {
                    url: s.to_string(),
                    reason: format!("unsupported scheme {}", other),
                }),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    if urls.is_empty() {
        return Err(ConfigError::Invalid {
            name: "source_url",
            reason: "at least one document location is required".to_string(),
        });
    }
    Ok(urls)
}

fn parse_classes(raw: &[String]) -> Result<Vec<String>, ConfigError> {
    let classes: Vec<String> = raw
        .iter()
        .map(|c| c.trim().trim_start_matches('.').to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if classes.is_empty() {
        return Err(ConfigError::ContentFilter(
            "at least one content class is required".to_string(),
        ));
    }
    if let Some(bad) = classes.iter().find(|c| c.chars().any(char::is_whitespace)) {
        return Err(ConfigError::ContentFilter(format!(
            "class name {:?} contains whitespace",
            bad
        )));
    }
    Ok(classes)
}
