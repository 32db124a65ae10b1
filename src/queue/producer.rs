//! Enqueue-only handle over the shared job queue.

use std::sync::Arc;

use super::{JobPayload, JobQueue, QueueError};

/// Producer side of the queue: appends ingest jobs and returns immediately.
///
/// Shares the queue handle with [`super::QueueWorker`] but carries no consumer state, so
/// request-path code can enqueue without ever touching worker lifecycle.
#[derive(Clone)]
pub struct QueueProducer {
    queue: Arc<dyn JobQueue>,
}

impl QueueProducer {
    /// Wrap a queue handle as a producer.
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Append an ingest job; any paused worker on the same queue resumes on this event.
    pub async fn enqueue(&self, payload: JobPayload) -> Result<String, QueueError> {
        let document_id = payload.document_id.clone();
        let job_id = self.queue.enqueue(payload).await?;
        tracing::info!(job_id = %job_id, document_id = %document_id, "Ingest job queued");
        Ok(job_id)
    }
}
