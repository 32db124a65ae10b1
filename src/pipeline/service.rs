//! Chunk/embed/index stage: split raw content, persist chunk metadata, and upsert vectors.

use std::sync::Arc;

use crate::config::get_config;
use crate::embedding::EmbeddingClient;
use crate::pipeline::chunking::TextSplitter;
use crate::pipeline::types::{ChunkEmbedOutcome, PipelineError};
use crate::qdrant::{QdrantService, VectorPoint, build_point_payload, derive_point_id};
use crate::store::{ChunkMetadata, DocumentStore, NewChunk};

/// Coordinates chunking, embedding, and vector upserts for one document at a time.
///
/// Owns long-lived handles to the store, embedding client, and Qdrant transport; the worker
/// constructs it once and shares it across concurrent jobs through an `Arc`.
pub struct ChunkEmbedService {
    store: Arc<dyn DocumentStore>,
    embedding_client: Arc<dyn EmbeddingClient>,
    qdrant_service: Arc<QdrantService>,
    splitter: TextSplitter,
}

impl ChunkEmbedService {
    /// Build the service from its collaborators, taking chunk settings from configuration.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedding_client: Arc<dyn EmbeddingClient>,
        qdrant_service: Arc<QdrantService>,
    ) -> Self {
        let config = get_config();
        Self {
            store,
            embedding_client,
            qdrant_service,
            splitter: TextSplitter::new(config.chunk_size, config.chunk_overlap),
        }
    }

    /// Chunk a document's raw content, persist the chunk batch, and index every chunk.
    ///
    /// Chunks are embedded and upserted strictly in ascending index order; the first upsert
    /// failure aborts the stage, so a partially indexed document is always partial by
    /// prefix. Already-upserted points are left in place; point ids are deterministic, so
    /// a retry overwrites them.
    pub async fn process_and_embed(
        &self,
        document_id: &str,
        chatbot_id: &str,
        file_name: &str,
    ) -> Result<ChunkEmbedOutcome, PipelineError> {
        let config = get_config();
        let document = self.store.get_document(document_id).await?;
        let text = document
            .raw_content
            .as_deref()
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| PipelineError::ContentMissing(document_id.to_string()))?;

        let chunks = self.splitter.split(text);
        let total_chunks = chunks.len();
        tracing::info!(document_id, chunks = total_chunks, "Chunks created");

        let batch: Vec<NewChunk> = chunks
            .into_iter()
            .enumerate()
            .map(|(index, content)| NewChunk {
                document_id: document_id.to_string(),
                chunk_index: index,
                token_count: content.chars().count().div_ceil(4),
                metadata: ChunkMetadata {
                    file_name: file_name.to_string(),
                    file_type: document.file_type.clone(),
                    chatbot_id: chatbot_id.to_string(),
                    chunk_index: index,
                    total_chunks,
                },
                content,
            })
            .collect();
        let records = self.store.create_chunks(batch).await?;

        self.qdrant_service
            .ensure_collection(chatbot_id, config.embedding_dimension as u64)
            .await?;

        for record in &records {
            let mut vectors = self
                .embedding_client
                .generate_embeddings(vec![record.content.clone()])
                .await?;
            let vector = vectors.pop().ok_or_else(|| {
                PipelineError::Embedding(crate::embedding::EmbeddingError::InvalidResponse(
                    "provider returned no vectors".into(),
                ))
            })?;

            let expected = config.embedding_dimension;
            if vector.len() != expected {
                return Err(PipelineError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }

            let point = VectorPoint {
                id: derive_point_id(&record.id),
                vector,
                payload: build_point_payload(record),
            };
            self.qdrant_service
                .upsert_points(chatbot_id, vec![point])
                .await?;
            tracing::debug!(
                document_id,
                chunk_index = record.chunk_index,
                chunk_id = %record.id,
                "Chunk indexed"
            );
        }

        tracing::info!(
            document_id,
            collection = chatbot_id,
            chunks = records.len(),
            "Document embedded"
        );
        Ok(ChunkEmbedOutcome {
            chunk_count: records.len(),
        })
    }
}
