//! Query-time retrieval: embed a query and search the chatbot's collection.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::embedding::{EmbeddingClient, EmbeddingError};
use crate::qdrant::{QdrantError, QdrantService, ScoredPoint};

/// Default number of chunks returned when the caller does not specify a limit.
pub const DEFAULT_RETRIEVE_LIMIT: usize = 5;

/// Errors emitted while orchestrating similarity searches.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Embedding provider failed to return vectors for the query text.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Qdrant search request returned an error response.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// Embedding provider returned no vectors.
    #[error("Embedding provider returned no vectors for the query")]
    EmptyEmbedding,
}

/// A retrieved chunk with its similarity score and payload metadata.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    /// Relational chunk identifier.
    pub chunk_id: Option<String>,
    /// Owning document identifier.
    pub document_id: Option<String>,
    /// Position of the chunk within its document.
    pub chunk_index: Option<usize>,
    /// Chunk text stored in the vector payload.
    pub content: Option<String>,
    /// Cosine similarity score reported by the index.
    pub similarity: f32,
    /// Full payload for downstream consumers.
    pub metadata: Map<String, Value>,
}

/// Embeds queries and searches per-chatbot collections.
pub struct RetrievalService {
    embedding_client: Arc<dyn EmbeddingClient>,
    qdrant_service: Arc<QdrantService>,
}

impl RetrievalService {
    /// Build the service from its collaborators.
    pub fn new(
        embedding_client: Arc<dyn EmbeddingClient>,
        qdrant_service: Arc<QdrantService>,
    ) -> Self {
        Self {
            embedding_client,
            qdrant_service,
        }
    }

    /// Return the `limit` most similar chunks for a query, best first.
    ///
    /// A chatbot with no ingested documents has no collection yet; that is a valid empty
    /// state and yields an empty list, not an error. Results keep the backend's descending
    /// score order.
    pub async fn retrieve(
        &self,
        query: &str,
        chatbot_id: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let mut vectors = self
            .embedding_client
            .generate_embeddings(vec![query.to_string()])
            .await?;
        let vector = vectors.pop().ok_or(RetrievalError::EmptyEmbedding)?;

        if !self.qdrant_service.collection_exists(chatbot_id).await? {
            tracing::debug!(
                collection = chatbot_id,
                "Collection missing, returning empty result set"
            );
            return Ok(Vec::new());
        }

        let hits = self
            .qdrant_service
            .search_points(chatbot_id, vector, limit)
            .await?;

        tracing::info!(
            collection = chatbot_id,
            results = hits.len(),
            "Retrieval query completed"
        );
        Ok(hits.into_iter().map(map_scored_point).collect())
    }
}

/// Map a scored index point into the retrieval result shape.
fn map_scored_point(point: ScoredPoint) -> RetrievedChunk {
    let payload = point.payload.unwrap_or_default();

    let string_field = |key: &str| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let chunk_index = payload
        .get("chunk_index")
        .and_then(Value::as_u64)
        .map(|value| value as usize);

    RetrievedChunk {
        chunk_id: string_field("chunk_id"),
        document_id: string_field("document_id"),
        chunk_index,
        content: string_field("content"),
        similarity: point.score,
        metadata: payload,
    }
}
