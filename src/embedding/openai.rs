//! OpenAI embeddings adapter speaking the `/v1/embeddings` REST surface.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{EmbeddingClient, EmbeddingError};
use crate::config::get_config;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// HTTP client for OpenAI-compatible embedding endpoints.
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiEmbeddingClient {
    /// Construct a client from the loaded configuration.
    pub fn from_config() -> Self {
        let config = get_config();
        Self::new(
            config
                .openai_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            config.openai_api_key.clone(),
            config.embedding_model.clone(),
        )
    }

    /// Construct a client for an explicit endpoint and model.
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        let http = Client::builder()
            .user_agent("ragpipe/embeddings")
            .build()
            .expect("Failed to construct reqwest::Client for embeddings");
        Self {
            http,
            base_url,
            api_key,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Err(EmbeddingError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        let expected = texts.len();
        let payload = json!({
            "model": self.model,
            "input": texts,
        });

        let mut request = self.http.post(self.endpoint()).json(&payload);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|error| {
            EmbeddingError::ProviderUnavailable(format!(
                "failed to reach embeddings endpoint at {}: {error}",
                self.base_url
            ))
        })?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::RateLimited(body));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::GenerationFailed(format!(
                "provider returned {status}: {body}"
            )));
        }

        let body: EmbeddingsResponse = response.json().await.map_err(|error| {
            EmbeddingError::InvalidResponse(format!("failed to decode embeddings: {error}"))
        })?;

        if body.data.len() != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {expected} embeddings, received {}",
                body.data.len()
            )));
        }

        let mut data = body.data;
        data.sort_by_key(|entry| entry.index);
        Ok(data.into_iter().map(|entry| entry.embedding).collect())
    }
}
