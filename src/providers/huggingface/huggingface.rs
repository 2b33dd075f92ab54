use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::error::ServiceError;
use crate::providers::traits::EmbeddingProvider;

const DEFAULT_ENDPOINT: &str = "https://router.huggingface.co/hf-inference/models/{model}/pipeline/feature-extraction";

/// Sentence embeddings from the Hugging Face feature-extraction pipeline.
#[derive(Clone)]
pub struct HuggingFaceProvider {
    client: Client,
    endpoint: String,
    token: Option<String>,
    model: String,
}

/// Sentence-transformer models return one pooled vector per input; plain
/// encoders return one vector per token, which is mean-pooled here.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeatureExtraction {
    Pooled(Vec<Vec<f32>>),
    Tokens(Vec<Vec<Vec<f32>>>),
}

impl HuggingFaceProvider {
    pub fn new(
        model: String,
        token: Option<String>,
        api_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder().timeout(timeout).build()?;
        let endpoint = api_url.unwrap_or(DEFAULT_ENDPOINT).replace("{model}", &model);

        Ok(Self {
            client,
            endpoint,
            token,
            model,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingProvider for HuggingFaceProvider {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client
            .post(&self.endpoint)
            .header("x-wait-for-model", "true")
            .json(&json!({ "inputs": texts }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status, body));
        }

        let parsed: FeatureExtraction = response.json().await?;
        let vectors = pool(parsed);
        if vectors.len() != texts.len() {
            return Err(ServiceError::InvalidResponse(format!(
                "feature extraction returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn pool(output: FeatureExtraction) -> Vec<Vec<f32>> {
    match output {
        FeatureExtraction::Pooled(vectors) => vectors,
        FeatureExtraction::Tokens(per_input) => per_input.into_iter().map(mean_pool).collect(),
    }
}

fn mean_pool(tokens: Vec<Vec<f32>>) -> Vec<f32> {
    let width = tokens.first().map(Vec::len).unwrap_or(0);
    let mut sum = vec![0.0f32; width];
    for token in &tokens {
        for (acc, x) in sum.iter_mut().zip(token) {
            *acc += x;
        }
    }
    if !tokens.is_empty() {
        let n = tokens.len() as f32;
        sum.iter_mut().for_each(|x| *x /= n);
    }
    sum
}
