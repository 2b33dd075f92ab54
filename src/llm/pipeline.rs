use chrono::Utc;
use log::info;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use super::chat::ChatClient;
use super::embeddings::EmbeddingGenerator;
use super::prompt::{join_context, PromptTemplate};
use crate::database::{SearchHit, VectorIndex};
use crate::error::RagError;
use crate::telemetry::{PipelineTrace, RunTracer, StageRecord};

/// Where a query currently is in the retrieve, generate sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Retrieving,
    Generating,
    Done,
}

/// State carried between pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    pub question: String,
    pub context: Vec<SearchHit>,
    pub answer: Option<String>,
}

impl QueryState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn context_text(&self) -> String {
        join_context(&self.context)
    }
}

/// Retrieve, then generate. One `Pipeline` is shared by every request; each
/// invocation owns its own `QueryState`.
pub struct Pipeline {
    index: Arc<VectorIndex>,
    embedder: Arc<EmbeddingGenerator>,
    chat: Arc<ChatClient>,
    template: Arc<PromptTemplate>,
    top_k: usize,
    tracer: Option<Arc<RunTracer>>,
}

impl Pipeline {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<EmbeddingGenerator>,
        chat: Arc<ChatClient>,
        template: Arc<PromptTemplate>,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            chat,
            template,
            top_k,
            tracer: None,
        }
    }

    pub fn with_tracer(mut self, tracer: Arc<RunTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Waits for run traces still being uploaded.
    pub async fn flush_traces(&self) {
        if let Some(tracer) = &self.tracer {
            tracer.flush().await;
        }
    }

    /// Runs both stages for `question` and returns the final state.
    #[tracing::instrument(name = "rag_pipeline", skip_all, fields(question_chars = question.chars().count()))]
    pub async fn invoke(&self, question: &str) -> Result<QueryState, RagError> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut state = QueryState::new(question);
        let mut stage = Stage::Retrieving;
        let mut records = Vec::with_capacity(2);

        let result = loop {
            match stage {
                Stage::Retrieving => {
                    let start = Utc::now();
                    let outcome = self.retrieve(&state).await;
                    records.push(StageRecord {
                        name: "retrieve".to_string(),
                        start,
                        end: Utc::now(),
                        inputs: json!({ "question": state.question }),
                        outputs: outcome.as_ref().map(|hits| documents_json(hits)).unwrap_or(Value::Null),
                        error: outcome.as_ref().err().map(|e| e.to_string()),
                    });
                    match outcome {
                        Ok(hits) => {
                            state.context = hits;
                            stage = Stage::Generating;
                        }
                        Err(e) => break Err(e),
                    }
                }
                Stage::Generating => {
                    let start = Utc::now();
                    let outcome = self.generate(&state).await;
                    records.push(StageRecord {
                        name: "generate".to_string(),
                        start,
                        end: Utc::now(),
                        inputs: json!({
                            "question": state.question,
                            "context": documents_json(&state.context)["documents"],
                        }),
                        outputs: outcome
                            .as_ref()
                            .map(|answer| json!({ "answer": answer }))
                            .unwrap_or(Value::Null),
                        error: outcome.as_ref().err().map(|e| e.to_string()),
                    });
                    match outcome {
                        Ok(answer) => {
                            state.answer = Some(answer);
                            stage = Stage::Done;
                        }
                        Err(e) => break Err(e),
                    }
                }
                Stage::Done => break Ok(()),
            }
        };

        if let Some(tracer) = &self.tracer {
            tracer.submit(&PipelineTrace {
                name: "rag-pipeline".to_string(),
                start: started_at,
                end: Utc::now(),
                inputs: json!({ "question": state.question }),
                outputs: json!({ "answer": state.answer }),
                error: result.as_ref().err().map(|e| e.to_string()),
                stages: records,
            });
        }

        result?;
        info!(
            "answered question with {} context chunks in {:.2?}",
            state.context.len(),
            timer.elapsed()
        );
        Ok(state)
    }

    /// Embeds the question and returns the `top_k` most similar chunks.
    #[tracing::instrument(name = "retrieve", skip_all, fields(top_k = self.top_k))]
    pub async fn retrieve(&self, state: &QueryState) -> Result<Vec<SearchHit>, RagError> {
        let vector = self
            .embedder
            .generate_embedding(&state.question)
            .await
            .map_err(RagError::EmbeddingService)?;
        Ok(self.index.query(&vector, self.top_k)?)
    }

    /// Renders the prompt over the retrieved context and asks the model.
    #[tracing::instrument(name = "generate", skip_all, fields(context_chunks = state.context.len()))]
    pub async fn generate(&self, state: &QueryState) -> Result<String, RagError> {
        let messages = self.template.format(&state.question, &state.context_text());
        let answer = self
            .chat
            .complete(&messages)
            .await
            .map_err(RagError::LlmService)?;
        Ok(answer.trim().to_string())
    }
}

fn documents_json(hits: &[SearchHit]) -> Value {
    let documents: Vec<Value> = hits
        .iter()
        .map(|hit| {
            json!({
                "page_content": hit.chunk.text,
                "metadata": {
                    "source": hit.chunk.source,
                    "start_index": hit.chunk.start_index,
                    "score": hit.score,
                },
            })
        })
        .collect();
    json!({ "documents": documents })
}
