//! Document and chunk records plus the relational-store collaborator contract.
//!
//! The pipeline is the sole writer of `status` and `raw_content` while a document is being
//! processed; everything else about the relational schema (creation, deletion, migrations)
//! belongs to the surrounding application and stays behind the [`DocumentStore`] trait.

mod memory;

pub use memory::InMemoryDocumentStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// Errors raised by document store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced document does not exist.
    #[error("Document not found: {0}")]
    NotFound(String),
    /// The backing store rejected or failed the operation.
    #[error("Store operation failed: {0}")]
    Backend(String),
}

/// Lifecycle states of a document as it moves through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    /// Enqueued for processing, not yet picked up.
    Queued,
    /// A worker is extracting raw text from the source file.
    Extracting,
    /// Raw text has been extracted and persisted.
    Extracted,
    /// Chunks are being embedded and indexed.
    Embedding,
    /// All chunks are indexed; terminal success state.
    Embedded,
    /// Processing failed terminally.
    Failed,
}

/// A document registered for ingestion.
///
/// Created by the surrounding application before the ingest request is enqueued; the
/// pipeline only mutates `status` and `raw_content`, refreshing `updated_at` on each write.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable document identifier.
    pub id: String,
    /// Opaque handle used to download the source file from object storage.
    pub source_file_ref: String,
    /// Original file name, including extension.
    pub file_name: String,
    /// Declared file type of the upload.
    pub file_type: String,
    /// Chatbot (collection) this document belongs to.
    pub chatbot_id: String,
    /// Current pipeline state.
    pub status: DocumentStatus,
    /// Normalized text extracted from the source file, once available.
    pub raw_content: Option<String>,
    /// Timestamp of the last mutation.
    pub updated_at: OffsetDateTime,
}

/// Denormalized metadata stored with every chunk and copied into vector payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Original file name of the owning document.
    pub file_name: String,
    /// Declared file type of the owning document.
    pub file_type: String,
    /// Chatbot (collection) key.
    pub chatbot_id: String,
    /// Position of this chunk within the document.
    pub chunk_index: usize,
    /// Total number of chunks produced for the document.
    pub total_chunks: usize,
}

/// A chunk awaiting persistence; the store assigns its identifier.
#[derive(Debug, Clone)]
pub struct NewChunk {
    /// Owning document.
    pub document_id: String,
    /// 0-based, contiguous position within the document.
    pub chunk_index: usize,
    /// Trimmed chunk text.
    pub content: String,
    /// Estimated token count (`ceil(chars / 4)`).
    pub token_count: usize,
    /// Denormalized metadata for retrieval payloads.
    pub metadata: ChunkMetadata,
}

/// A persisted chunk record.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// Store-assigned chunk identifier.
    pub id: String,
    /// Owning document.
    pub document_id: String,
    /// 0-based, contiguous position within the document.
    pub chunk_index: usize,
    /// Trimmed chunk text.
    pub content: String,
    /// Estimated token count.
    pub token_count: usize,
    /// Denormalized metadata for retrieval payloads.
    pub metadata: ChunkMetadata,
}

/// Relational store operations the pipeline depends on.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by id.
    async fn get_document(&self, id: &str) -> Result<Document, StoreError>;

    /// Update a document's pipeline status.
    async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<(), StoreError>;

    /// Overwrite a document's extracted raw content.
    async fn update_content(&self, id: &str, raw_content: String) -> Result<(), StoreError>;

    /// Persist all chunks for a document as one atomic batch.
    ///
    /// Either every chunk is inserted and returned with store-assigned ids, or none are.
    async fn create_chunks(&self, chunks: Vec<NewChunk>) -> Result<Vec<ChunkRecord>, StoreError>;
}
