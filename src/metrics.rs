use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_processed: AtomicU64,
    chunks_embedded: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_failed: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully processed document and the number of chunks it produced.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.chunks_embedded
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a job attempt that failed and was scheduled for retry.
    pub fn record_retry(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job that reached terminal failure.
    pub fn record_failure(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            chunks_embedded: self.chunks_embedded.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents that completed the full pipeline since startup.
    pub documents_processed: u64,
    /// Total chunk count embedded across all processed documents.
    pub chunks_embedded: u64,
    /// Job attempts that failed and were requeued with backoff.
    pub jobs_retried: u64,
    /// Jobs that exhausted their attempts or failed non-retriably.
    pub jobs_failed: u64,
}
