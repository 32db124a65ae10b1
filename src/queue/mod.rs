//! Durable job queue contract, in-process backend, producer, and idle-aware worker.
//!
//! The queue is the coordination point of the ingest pipeline: producers append jobs and
//! return immediately, workers claim jobs under a renewable visibility lock, and the
//! backend alone decides retry-versus-terminal from attempt counts and error
//! retriability. [`QueueProducer`] and [`QueueWorker`] are deliberately separate types
//! wrapping the same queue handle, so an enqueue-only surface never carries
//! half-initialized consumer state.

pub mod memory;
mod processor;
mod producer;
mod worker;

pub use memory::MemoryQueue;
pub use processor::DocumentProcessor;
pub use producer::QueueProducer;
pub use worker::{JobError, JobProcessor, QueueWorker, WorkerConfig, WorkerHandle};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::Config;

/// Errors raised by queue backends.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The referenced job does not exist or is not in the expected state.
    #[error("Unknown job: {0}")]
    UnknownJob(String),
    /// The backing queue rejected or failed the operation.
    #[error("Queue operation failed: {0}")]
    Backend(String),
}

/// Payload describing one document-ingest job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    /// Document to process.
    pub document_id: String,
    /// Opaque object-storage handle of the uploaded file.
    pub source_file_ref: String,
    /// Original file name, including extension.
    pub file_name: String,
    /// Declared file type of the upload.
    pub file_type: String,
    /// Target chatbot (collection) key.
    pub chatbot_id: String,
}

/// Queue-side lifecycle states of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Ready to be claimed by a worker.
    Waiting,
    /// Claimed and currently processing under a visibility lock.
    Active,
    /// Scheduled for a later retry attempt.
    Delayed,
    /// Finished successfully; terminal.
    Completed,
    /// Exhausted its attempts or failed non-retriably; terminal.
    Failed,
}

/// Snapshot of a job known to the queue.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Queue-assigned job identifier.
    pub id: String,
    /// Ingest payload.
    pub payload: JobPayload,
    /// Current queue-side state.
    pub status: JobStatus,
    /// Processing attempts that have finished (successfully or not).
    pub attempts_made: u32,
    /// Times the job was requeued after its lock expired.
    pub stalls: u32,
    /// Last reported progress percentage.
    pub progress: u8,
}

/// A job claimed by a worker under a visibility lock.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    /// Queue-assigned job identifier.
    pub id: String,
    /// Ingest payload.
    pub payload: JobPayload,
    /// 1-based number of the attempt this lease represents.
    pub attempt: u32,
}

/// Job counts used for idle detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobCounts {
    /// Jobs ready to be claimed.
    pub waiting: usize,
    /// Jobs currently held by workers.
    pub active: usize,
    /// Jobs scheduled for a later retry.
    pub delayed: usize,
}

impl JobCounts {
    /// Whether any job is waiting, active, or delayed.
    pub fn has_jobs(&self) -> bool {
        self.waiting > 0 || self.active > 0 || self.delayed > 0
    }
}

/// Events broadcast by the queue to interested workers.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A new job was appended and is visible to workers.
    Enqueued,
    /// A job reached terminal failure without a worker attached (stall exhaustion);
    /// a live worker should run the terminal-failure cleanup for it.
    TerminalFailure(JobRecord),
}

/// Outcome of reporting a job failure to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The job was requeued with backoff and will run again.
    Retrying {
        /// Delay before the next attempt becomes claimable.
        delay: Duration,
    },
    /// The job is permanently failed.
    Terminal,
}

/// Retry, lock, and stall settings applied by the queue backend.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Total processing attempts before terminal failure.
    pub attempts: u32,
    /// Initial retry delay; doubles on each subsequent attempt.
    pub backoff_initial: Duration,
    /// Visibility lock granted to a claiming worker.
    pub lock_duration: Duration,
    /// Times a stalled job is requeued before being failed outright.
    pub max_stalls: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_initial: Duration::from_secs(60),
            lock_duration: Duration::from_secs(600),
            max_stalls: 2,
        }
    }
}

impl QueueConfig {
    /// Derive queue settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            attempts: config.job_attempts.max(1),
            backoff_initial: config.job_backoff_initial,
            lock_duration: config.job_lock_duration,
            max_stalls: config.job_max_stalls,
        }
    }
}

/// Durable, at-least-once job queue collaborator contract.
///
/// Implementations must keep FIFO order among waiting jobs, survive producer/worker
/// restarts for as long as the backing state lives, and guarantee that a claimed job whose
/// lock expires becomes claimable again.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job and return its identifier; the job is immediately visible to workers.
    async fn enqueue(&self, payload: JobPayload) -> Result<String, QueueError>;

    /// Claim the next waiting job under a visibility lock, if any.
    async fn claim(&self) -> Result<Option<LeasedJob>, QueueError>;

    /// Extend the visibility lock of an active job.
    async fn renew_lock(&self, job_id: &str) -> Result<(), QueueError>;

    /// Record a progress checkpoint for external observability.
    async fn set_progress(&self, job_id: &str, progress: u8) -> Result<(), QueueError>;

    /// Mark an active job as successfully completed.
    async fn complete(&self, job_id: &str) -> Result<(), QueueError>;

    /// Report a failed attempt; the queue decides between backoff retry and terminal failure.
    async fn fail(&self, job_id: &str, retriable: bool) -> Result<FailOutcome, QueueError>;

    /// Current waiting/active/delayed counts.
    async fn counts(&self) -> Result<JobCounts, QueueError>;

    /// Snapshot a job by id.
    async fn job(&self, job_id: &str) -> Result<Option<JobRecord>, QueueError>;

    /// Subscribe to queue events (new jobs, orphaned terminal failures).
    fn subscribe(&self) -> broadcast::Receiver<QueueEvent>;
}
