//! In-memory [`DocumentStore`] used by the single-process deployment and the test suite.

use super::{ChunkRecord, Document, DocumentStatus, DocumentStore, NewChunk, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct StoreState {
    documents: HashMap<String, Document>,
    chunks: HashMap<String, Vec<ChunkRecord>>,
}

/// Mutex-guarded map-backed document store.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    state: Mutex<StoreState>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document, replacing any existing record with the same id.
    ///
    /// Documents are created by the surrounding application before enqueue; this is that
    /// collaborator's side of the contract.
    pub async fn insert_document(&self, document: Document) {
        let mut state = self.state.lock().await;
        state.documents.insert(document.id.clone(), document);
    }

    /// Return the persisted chunks for a document in index order.
    pub async fn chunks_for(&self, document_id: &str) -> Vec<ChunkRecord> {
        let state = self.state.lock().await;
        state.chunks.get(document_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, id: &str) -> Result<Document, StoreError> {
        let state = self.state.lock().await;
        state
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let document = state
            .documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        document.status = status;
        document.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn update_content(&self, id: &str, raw_content: String) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let document = state
            .documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        document.raw_content = Some(raw_content);
        document.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn create_chunks(&self, chunks: Vec<NewChunk>) -> Result<Vec<ChunkRecord>, StoreError> {
        let mut state = self.state.lock().await;
        for chunk in &chunks {
            if !state.documents.contains_key(&chunk.document_id) {
                return Err(StoreError::NotFound(chunk.document_id.clone()));
            }
        }

        let mut records = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let record = ChunkRecord {
                id: Uuid::new_v4().to_string(),
                document_id: chunk.document_id,
                chunk_index: chunk.chunk_index,
                content: chunk.content,
                token_count: chunk.token_count,
                metadata: chunk.metadata,
            };
            state
                .chunks
                .entry(record.document_id.clone())
                .or_default()
                .push(record.clone());
            records.push(record);
        }
        Ok(records)
    }
}
