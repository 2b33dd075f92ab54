use async_trait::async_trait;
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs, EmbeddingInput,
    },
    Client,
};
use std::time::Duration;

use crate::error::ServiceError;
use crate::providers::traits::{ChatMessage, CompletionProvider, EmbeddingProvider, Role};

fn build_client(api_key: &str, api_base: &str, timeout: Duration) -> Result<Client<OpenAIConfig>, ServiceError> {
    let config = OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(api_base.trim_end_matches('/'));
    let http_client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Client::with_config(config).with_http_client(http_client))
}

fn map_openai_error(err: OpenAIError) -> ServiceError {
    match err {
        OpenAIError::Reqwest(e) => ServiceError::from(e),
        OpenAIError::ApiError(api) => ServiceError::Rejected(api.message),
        OpenAIError::JSONDeserialize(e) => ServiceError::InvalidResponse(e.to_string()),
        other => ServiceError::InvalidResponse(other.to_string()),
    }
}

#[derive(Clone)]
pub struct OpenAIProvider {
    client: Client<OpenAIConfig>,
    chat_model: String,
    temperature: f32,
}

impl OpenAIProvider {
    pub fn new(
        api_key: &str,
        api_base: &str,
        chat_model: String,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(api_key, api_base, timeout)?,
            chat_model,
            temperature,
        })
    }
}

fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let message = match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content.clone())
            .build()?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content.clone())
            .build()?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(message.content.clone())
            .build()?
            .into(),
    };
    Ok(message)
}

#[async_trait]
impl CompletionProvider for OpenAIProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        let messages = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_openai_error)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .temperature(self.temperature)
            .messages(messages)
            .build()
            .map_err(map_openai_error)?;

        let response = self.client.chat().create(request).await.map_err(map_openai_error)?;

        response.choices.first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| ServiceError::InvalidResponse("no response content".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.chat_model
    }
}

#[derive(Clone)]
pub struct OpenAIEmbeddingProvider {
    client: Client<OpenAIConfig>,
    embedding_model: String,
}

impl OpenAIEmbeddingProvider {
    pub fn new(
        api_key: &str,
        api_base: &str,
        embedding_model: String,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(api_key, api_base, timeout)?,
            embedding_model,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .input(EmbeddingInput::StringArray(texts.to_vec()))
            .build()
            .map_err(map_openai_error)?;

        let response = self.client.embeddings().create(request).await.map_err(map_openai_error)?;

        let mut data = response.data;
        if data.len() != texts.len() {
            return Err(ServiceError::InvalidResponse(format!(
                "OpenAI returned {} embeddings for {} inputs",
                data.len(),
                texts.len()
            )));
        }
        data.sort_by_key(|entry| entry.index);
        Ok(data.into_iter().map(|entry| entry.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }
}
