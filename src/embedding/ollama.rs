//! Ollama embeddings adapter issuing HTTP requests directly to the local runtime.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{EmbeddingClient, EmbeddingError};
use crate::config::get_config;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// HTTP client for the Ollama embeddings endpoint.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbeddingClient {
    /// Construct a client from the loaded configuration.
    pub fn from_config() -> Self {
        let config = get_config();
        Self::new(
            config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            config.embedding_model.clone(),
        )
    }

    /// Construct a client for an explicit endpoint and model.
    pub fn new(base_url: String, model: String) -> Self {
        let http = Client::builder()
            .user_agent("ragpipe/embeddings")
            .build()
            .expect("Failed to construct reqwest::Client for embeddings");
        Self {
            http,
            base_url,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embeddings", self.base_url.trim_end_matches('/'))
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let payload = json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                EmbeddingError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EmbeddingError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaEmbeddingResponse = response.json().await.map_err(|error| {
            EmbeddingError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        Ok(body.embedding)
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Err(EmbeddingError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for text in &texts {
            vectors.push(self.embed_one(text).await?);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn embeds_each_text_in_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embeddings");
                then.status(200)
                    .json_body(serde_json::json!({ "embedding": [0.25, 0.75] }));
            })
            .await;

        let client = OllamaEmbeddingClient::new(server.base_url(), "nomic-embed-text".into());
        let vectors = client
            .generate_embeddings(vec!["one".into(), "two".into()])
            .await
            .expect("embeddings");

        assert_eq!(mock.hits_async().await, 2);
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vec![0.25, 0.75]);
    }

    #[tokio::test]
    async fn error_status_maps_to_generation_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embeddings");
                then.status(500).body("boom");
            })
            .await;

        let client = OllamaEmbeddingClient::new(server.base_url(), "nomic-embed-text".into());
        let error = client
            .generate_embeddings(vec!["one".into()])
            .await
            .unwrap_err();
        assert!(matches!(error, EmbeddingError::GenerationFailed(message) if message.contains("500")));
    }
}
