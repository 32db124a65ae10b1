//! Error and outcome types for the chunk/embed/index stage.

use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::qdrant::QdrantError;
use crate::store::StoreError;

/// Errors emitted by the chunk/embed/index stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The document has no extracted content to chunk.
    #[error("Document {0} not found or has no content")]
    ContentMissing(String),
    /// Relational store interaction failed.
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),
    /// Embedding provider failed to produce vectors.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Produced embedding does not match the collection dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the collection was created with.
        expected: usize,
        /// Dimension the provider returned.
        actual: usize,
    },
    /// Vector index interaction failed during collection setup or upsert.
    #[error("Qdrant request failed: {0}")]
    Index(#[from] QdrantError),
}

impl PipelineError {
    /// Whether retrying the job can possibly succeed.
    ///
    /// Missing content is a precondition failure that retries cannot heal; provider and
    /// index errors are assumed transient and go through the queue's backoff.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::ContentMissing(_))
    }
}

/// Summary of a completed chunk/embed/index run.
#[derive(Debug, Clone, Copy)]
pub struct ChunkEmbedOutcome {
    /// Number of chunks persisted and upserted for the document.
    pub chunk_count: usize,
}
