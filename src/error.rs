use thiserror::Error;

use crate::database::IndexError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set (environment variable or CLI flag)")]
    MissingSecret(&'static str),
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    ChunkOverlap { chunk_size: usize, overlap: usize },
    #[error("chunk size must be greater than zero")]
    ChunkSize,
    #[error("invalid source URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid content filter: {0}")]
    ContentFilter(String),
    #[error("invalid prompt template: {0}")]
    PromptTemplate(String),
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to fetch {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: ServiceError,
    },
    #[error("no content matched the extraction filter at {0}")]
    EmptyDocument(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Unreachable { source, .. } => source.is_transient(),
            FetchError::EmptyDocument(_) => false,
        }
    }
}

/// Failure of a call to an external service (document host, embedding
/// service, hosted language model).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by upstream service")]
    RateLimited,
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Timeout | ServiceError::RateLimited | ServiceError::Transport(_) => true,
            ServiceError::Status { status, .. } => *status >= 500,
            ServiceError::InvalidResponse(_) | ServiceError::Rejected(_) => false,
        }
    }

    /// Classifies a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ServiceError::RateLimited
        } else {
            ServiceError::Status {
                status: status.as_u16(),
                body,
            }
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout
        } else if err.is_decode() {
            ServiceError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            ServiceError::from_status(status, err.to_string())
        } else {
            ServiceError::Transport(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("embedding service error: {0}")]
    EmbeddingService(#[source] ServiceError),
    #[error("language model service error: {0}")]
    LlmService(#[source] ServiceError),
    #[error("{0}")]
    Validation(String),
    #[error("vector index error: {0}")]
    Index(#[from] IndexError),
}

impl RagError {
    pub fn is_transient(&self) -> bool {
        match self {
            RagError::Fetch(e) => e.is_transient(),
            RagError::EmbeddingService(e) | RagError::LlmService(e) => e.is_transient(),
            RagError::Config(_) | RagError::Validation(_) | RagError::Index(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_service_failures() {
        assert!(ServiceError::Timeout.is_transient());
        assert!(ServiceError::RateLimited.is_transient());
        assert!(ServiceError::Status { status: 503, body: String::new() }.is_transient());
        assert!(!ServiceError::Status { status: 401, body: String::new() }.is_transient());
        assert!(!ServiceError::InvalidResponse("bad json".into()).is_transient());
    }

    #[test]
    fn status_429_is_rate_limited() {
        let err = ServiceError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert_eq!(err, ServiceError::RateLimited);
    }

    #[test]
    fn validation_is_never_transient() {
        assert!(!RagError::Validation("No question provided".into()).is_transient());
        assert!(RagError::LlmService(ServiceError::Timeout).is_transient());
    }
}
