//! Job state machine: drives one document through extraction and embedding.

use std::sync::Arc;

use async_trait::async_trait;

use super::{JobPayload, JobQueue, LeasedJob};
use crate::extraction::ExtractionService;
use crate::metrics::PipelineMetrics;
use crate::pipeline::ChunkEmbedService;
use crate::queue::worker::{JobError, JobProcessor};
use crate::store::{DocumentStatus, DocumentStore};

/// Runs the extraction and chunk/embed stages for each claimed job, keeping the document
/// status record and the job's progress checkpoints in step with pipeline state.
pub struct DocumentProcessor {
    extraction: ExtractionService,
    chunk_embed: ChunkEmbedService,
    store: Arc<dyn DocumentStore>,
    queue: Arc<dyn JobQueue>,
    metrics: Arc<PipelineMetrics>,
}

impl DocumentProcessor {
    /// Build the processor from its stage services and collaborators.
    pub fn new(
        extraction: ExtractionService,
        chunk_embed: ChunkEmbedService,
        store: Arc<dyn DocumentStore>,
        queue: Arc<dyn JobQueue>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            extraction,
            chunk_embed,
            store,
            queue,
            metrics,
        }
    }

    async fn report_progress(&self, job_id: &str, progress: u8) {
        if let Err(error) = self.queue.set_progress(job_id, progress).await {
            tracing::warn!(job_id, progress, error = %error, "Failed to report job progress");
        }
    }
}

#[async_trait]
impl JobProcessor for DocumentProcessor {
    async fn process(&self, job: &LeasedJob) -> Result<(), JobError> {
        let JobPayload {
            document_id,
            source_file_ref,
            file_name,
            file_type,
            chatbot_id,
        } = &job.payload;

        self.report_progress(&job.id, 10).await;
        self.store
            .update_status(document_id, DocumentStatus::Extracting)
            .await?;
        self.extraction
            .extract_and_save(document_id, source_file_ref, file_name, file_type)
            .await?;
        self.store
            .update_status(document_id, DocumentStatus::Extracted)
            .await?;
        self.report_progress(&job.id, 50).await;

        self.store
            .update_status(document_id, DocumentStatus::Embedding)
            .await?;
        let outcome = self
            .chunk_embed
            .process_and_embed(document_id, chatbot_id, file_name)
            .await?;
        self.report_progress(&job.id, 90).await;

        self.store
            .update_status(document_id, DocumentStatus::Embedded)
            .await?;
        self.report_progress(&job.id, 100).await;

        self.metrics.record_document(outcome.chunk_count as u64);
        tracing::info!(
            document_id = %document_id,
            chunks = outcome.chunk_count,
            "Document processed"
        );
        Ok(())
    }

    async fn on_terminal_failure(&self, payload: &JobPayload) {
        // The queue has given up on this job; the document must never stay parked in an
        // intermediate state.
        if let Err(error) = self
            .store
            .update_status(&payload.document_id, DocumentStatus::Failed)
            .await
        {
            tracing::error!(
                document_id = %payload.document_id,
                error = %error,
                "Failed to mark document as failed"
            );
        }
    }
}
