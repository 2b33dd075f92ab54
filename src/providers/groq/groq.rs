use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::ServiceError;
use crate::providers::traits::{ChatMessage, CompletionProvider};

/// Chat completions against Groq's OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct GroqProvider {
    api_key: String,
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl GroqProvider {
    pub fn new(
        api_key: String,
        api_url: &str,
        model: String,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            api_key,
            client,
            endpoint: format!("{}/chat/completions", api_url.trim_end_matches('/')),
            model,
            temperature,
        })
    }
}

#[async_trait]
impl CompletionProvider for GroqProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        let response = self.client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "temperature": self.temperature
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status, error_text));
        }

        let response_json: Value = response.json().await?;
        extract_content(&response_json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn extract_content(response_json: &Value) -> Result<String, ServiceError> {
    // Check for API-level errors
    if let Some(error) = response_json.get("error") {
        return Err(ServiceError::Rejected(error.to_string()));
    }

    response_json
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ServiceError::InvalidResponse(format!("missing choices[0].message.content in {}", response_json))
        })
}
