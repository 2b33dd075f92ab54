use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::context::RagContext;
use crate::error::{RagError, ServiceError};

pub const MAX_QUESTION_CHARS: usize = 4000;
const NO_QUESTION: &str = "No question provided";
const RETRY_AFTER_SECS: &str = "5";

#[derive(Clone)]
pub struct AppState {
    context: Arc<RagContext>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AskRequest {
    #[serde(default)]
    #[validate(custom = "question_limits")]
    pub question: Option<String>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: Some(question.into()),
        }
    }

    /// The trimmed question, or a `RagError::Validation` saying why it
    /// cannot be answered.
    pub fn validated_question(&self) -> Result<&str, RagError> {
        let question = self
            .question
            .as_deref()
            .ok_or_else(|| RagError::Validation(NO_QUESTION.to_string()))?;
        self.validate()
            .map_err(|errors| RagError::Validation(describe(&errors)))?;
        Ok(question.trim())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub entries: usize,
    pub dimensions: usize,
}

fn question_limits(question: &str) -> Result<(), ValidationError> {
    if question.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some(NO_QUESTION.into());
        return Err(err);
    }
    if question.chars().count() > MAX_QUESTION_CHARS {
        let mut err = ValidationError::new("length");
        err.message = Some(format!("Question must be at most {} characters", MAX_QUESTION_CHARS).into());
        return Err(err);
    }
    Ok(())
}

/// Handler-level failure. Anything that is not the caller's fault is
/// reported as a generic 500; the cause only goes to the log.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal { transient: bool },
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Validation(detail) => ApiError::BadRequest(detail),
            other => {
                error!("Failed to answer question: {}", other);
                ApiError::Internal {
                    transient: other.is_transient(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { detail })).into_response()
            }
            ApiError::Internal { transient } => {
                let mut response = (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        detail: "Internal server error".to_string(),
                    }),
                )
                    .into_response();
                if transient {
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
                }
                response
            }
        }
    }
}

/// Create and configure the API router
pub fn create_api(context: Arc<RagContext>, max_concurrent_requests: usize) -> Router {
    let state = AppState { context };

    // Fully permissive CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/ask", post(ask_handler))
        .route("/health", get(health_check))
        .layer(GlobalConcurrencyLimitLayer::new(max_concurrent_requests.max(1)))
        .layer(cors)
        .with_state(state)
}

async fn ask_handler(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Response {
    match answer(&state, payload).await {
        Ok(answer) => Json(AskResponse { answer }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn answer(
    state: &AppState,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<String, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("Rejected /ask body: {}", rejection.body_text());
        RagError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let question = request.validated_question()?;
    info!("Answering question ({} chars)", question.chars().count());

    let result = state.context.pipeline().invoke(question).await?;
    result.answer.ok_or_else(|| {
        ApiError::from(RagError::LlmService(ServiceError::InvalidResponse(
            "pipeline finished without an answer".to_string(),
        )))
    })
}

fn describe(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| errors.to_string())
}

async fn health_check(State(state): State<AppState>) -> Response {
    let index = state.context.index();
    Json(HealthResponse {
        status: "ok".to_string(),
        entries: index.len(),
        dimensions: index.dimensions(),
    })
    .into_response()
}
