use crate::config::{EmbeddingProvider, get_config};
use async_trait::async_trait;
use thiserror::Error;

mod ollama;
mod openai;

pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider endpoint could not be reached or was misconfigured.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider applied rate limiting to the request.
    #[error("Embedding provider rate limited the request: {0}")]
    RateLimited(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied chunk of text.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Deterministic hash-projection embedding client.
///
/// Projects each input's bytes into a fixed-dimension vector and normalizes to unit length,
/// so identical text always yields the identical vector. Used offline and by the test suite;
/// not a substitute for a real model's semantics.
pub struct DeterministicEmbeddingClient;

impl DeterministicEmbeddingClient {
    /// Construct a new deterministic embedding client instance.
    pub const fn new() -> Self {
        Self
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

impl Default for DeterministicEmbeddingClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingClient for DeterministicEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let config = get_config();
        let dimension = config.embedding_dimension;

        if dimension == 0 {
            return Err(EmbeddingError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        if texts.is_empty() {
            return Err(EmbeddingError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        let embeddings = texts
            .into_iter()
            .map(|text| Self::encode(&text, dimension))
            .collect();

        Ok(embeddings)
    }
}

/// Build an embedding client for the configured provider.
pub fn get_embedding_client() -> std::sync::Arc<dyn EmbeddingClient> {
    let config = get_config();
    match config.embedding_provider {
        EmbeddingProvider::OpenAi => std::sync::Arc::new(OpenAiEmbeddingClient::from_config()),
        EmbeddingProvider::Ollama => std::sync::Arc::new(OllamaEmbeddingClient::from_config()),
        EmbeddingProvider::Deterministic => std::sync::Arc::new(DeterministicEmbeddingClient::new()),
    }
}
