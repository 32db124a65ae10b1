//! Idle-aware queue worker: claims jobs, renews locks, and powers down when idle.
//!
//! The scheduler task owns every piece of lifecycle state (paused flag, idle deadline);
//! external signals arrive as queue broadcast events or channel messages, never through
//! shared mutable flags. Pausing only stops claiming; in-flight jobs always run to
//! completion or failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use super::{FailOutcome, JobPayload, JobQueue, LeasedJob, QueueError, QueueEvent};
use crate::config::Config;
use crate::extraction::ExtractionError;
use crate::metrics::PipelineMetrics;
use crate::pipeline::PipelineError;
use crate::store::StoreError;

/// Errors surfaced by a job processor to the worker.
#[derive(Debug, Error)]
pub enum JobError {
    /// Extraction stage failed.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// Chunk/embed/index stage failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// Status bookkeeping against the relational store failed.
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),
    /// Progress reporting against the queue failed.
    #[error("Queue operation failed: {0}")]
    Queue(#[from] QueueError),
}

impl JobError {
    /// Whether the queue should retry the job with backoff.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Extraction(error) => error.is_retriable(),
            Self::Pipeline(error) => error.is_retriable(),
            Self::Store(_) | Self::Queue(_) => true,
        }
    }
}

/// Work executed for each claimed job.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Run the full processing pipeline for one job.
    async fn process(&self, job: &LeasedJob) -> Result<(), JobError>;

    /// Clean up after a job the queue declared terminally failed.
    async fn on_terminal_failure(&self, payload: &JobPayload);
}

/// Concurrency and lifecycle settings for the worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Jobs processed concurrently by this worker.
    pub concurrency: usize,
    /// Quiet period after which the worker pauses itself.
    pub idle_delay: Duration,
    /// Interval between idle-state checks.
    pub idle_check_interval: Duration,
    /// Poll interval while the queue has nothing claimable.
    pub drain_delay: Duration,
    /// Interval between lock renewals for in-flight jobs.
    pub lock_renew_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            idle_delay: Duration::from_secs(300),
            idle_check_interval: Duration::from_secs(120),
            drain_delay: Duration::from_secs(2),
            lock_renew_interval: Duration::from_secs(200),
        }
    }
}

impl WorkerConfig {
    /// Derive worker settings from the loaded configuration.
    ///
    /// Locks are renewed at a third of their duration so a healthy job never stalls.
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.worker_concurrency.max(1),
            idle_delay: config.idle_delay,
            idle_check_interval: config.idle_check_interval,
            drain_delay: Duration::from_secs(2),
            lock_renew_interval: config.job_lock_duration / 3,
        }
    }
}

/// Consumer side of the queue: a scheduler task plus up to `concurrency` job tasks.
pub struct QueueWorker {
    queue: Arc<dyn JobQueue>,
    processor: Arc<dyn JobProcessor>,
    metrics: Arc<PipelineMetrics>,
    config: WorkerConfig,
}

/// Handle for stopping a spawned worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Ask the scheduler to stop claiming and wait for it to exit.
    ///
    /// In-flight jobs keep running on their own tasks; only the scheduler is awaited.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.join.await;
    }
}

impl QueueWorker {
    /// Build a worker over the shared queue handle.
    pub fn new(
        queue: Arc<dyn JobQueue>,
        processor: Arc<dyn JobProcessor>,
        metrics: Arc<PipelineMetrics>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            processor,
            metrics,
            config,
        }
    }

    /// Spawn the scheduler task and return a shutdown handle.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let join = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle { shutdown_tx, join }
    }

    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut events = self.queue.subscribe();
        let mut check_interval = tokio::time::interval(self.config.idle_check_interval);
        check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let (done_tx, mut done_rx) = mpsc::channel::<()>(self.config.concurrency.max(1));

        let mut paused = false;
        let mut idle_deadline: Option<Instant> = None;

        tracing::info!(
            concurrency = self.config.concurrency,
            "Queue worker started"
        );

        loop {
            if !paused {
                while semaphore.available_permits() > 0 {
                    match self.queue.claim().await {
                        Ok(Some(job)) => {
                            idle_deadline = None;
                            let permit = semaphore
                                .clone()
                                .try_acquire_owned()
                                .expect("permit available by loop condition");
                            self.spawn_job(job, permit, done_tx.clone());
                        }
                        Ok(None) => break,
                        Err(error) => {
                            tracing::warn!(error = %error, "Failed to claim job");
                            break;
                        }
                    }
                }
            }

            let armed_deadline = idle_deadline;
            let idle_fire = async move {
                match armed_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Queue worker shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Ok(QueueEvent::Enqueued) => {
                        if paused {
                            tracing::info!("New job added, resuming worker from idle mode");
                        }
                        paused = false;
                        idle_deadline = None;
                    }
                    Ok(QueueEvent::TerminalFailure(job)) => {
                        self.metrics.record_failure();
                        self.processor.on_terminal_failure(&job.payload).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Worker lagged behind queue events");
                        // A lagged enqueue event must still resume a paused worker.
                        paused = false;
                        idle_deadline = None;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = done_rx.recv() => {
                    self.check_idle(&mut idle_deadline, paused).await;
                }
                _ = check_interval.tick() => {
                    self.check_idle(&mut idle_deadline, paused).await;
                }
                _ = idle_fire => {
                    if self.queue_is_empty().await {
                        tracing::info!("Entering idle mode, pausing worker");
                        paused = true;
                    }
                    idle_deadline = None;
                }
                _ = tokio::time::sleep(self.config.drain_delay), if !paused => {}
            }
        }
    }

    fn spawn_job(
        &self,
        job: LeasedJob,
        permit: tokio::sync::OwnedSemaphorePermit,
        done_tx: mpsc::Sender<()>,
    ) {
        let queue = Arc::clone(&self.queue);
        let processor = Arc::clone(&self.processor);
        let metrics = Arc::clone(&self.metrics);
        let renew_interval = self.config.lock_renew_interval;

        tokio::spawn(async move {
            let _permit = permit;
            tracing::info!(
                job_id = %job.id,
                document_id = %job.payload.document_id,
                file_name = %job.payload.file_name,
                attempt = job.attempt,
                "Processing job"
            );

            let renewer = {
                let queue = Arc::clone(&queue);
                let job_id = job.id.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(renew_interval).await;
                        if queue.renew_lock(&job_id).await.is_err() {
                            break;
                        }
                    }
                })
            };

            let result = processor.process(&job).await;
            renewer.abort();

            match result {
                Ok(()) => {
                    if let Err(error) = queue.complete(&job.id).await {
                        tracing::warn!(job_id = %job.id, error = %error, "Failed to mark job completed");
                    }
                    tracing::info!(job_id = %job.id, "Job completed successfully");
                }
                Err(error) => {
                    tracing::error!(job_id = %job.id, error = %error, "Job failed");
                    match queue.fail(&job.id, error.is_retriable()).await {
                        Ok(FailOutcome::Retrying { delay }) => {
                            metrics.record_retry();
                            tracing::warn!(
                                job_id = %job.id,
                                retry_in_secs = delay.as_secs(),
                                "Job scheduled for retry"
                            );
                        }
                        Ok(FailOutcome::Terminal) => {
                            metrics.record_failure();
                            processor.on_terminal_failure(&job.payload).await;
                            tracing::error!(job_id = %job.id, "Job permanently failed");
                        }
                        Err(queue_error) => {
                            tracing::error!(job_id = %job.id, error = %queue_error, "Failed to report job failure");
                        }
                    }
                }
            }

            let _ = done_tx.send(()).await;
        });
    }

    async fn check_idle(&self, idle_deadline: &mut Option<Instant>, paused: bool) {
        if paused {
            return;
        }
        if self.queue_is_empty().await {
            if idle_deadline.is_none() {
                tracing::debug!("Queue empty, arming idle timer");
                *idle_deadline = Some(Instant::now() + self.config.idle_delay);
            }
        } else {
            *idle_deadline = None;
        }
    }

    async fn queue_is_empty(&self) -> bool {
        match self.queue.counts().await {
            Ok(counts) => !counts.has_jobs(),
            Err(error) => {
                tracing::warn!(error = %error, "Failed to read queue counts");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobStatus, MemoryQueue, QueueConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    fn payload(document_id: &str) -> JobPayload {
        JobPayload {
            document_id: document_id.to_string(),
            source_file_ref: "ref".into(),
            file_name: "notes.txt".into(),
            file_type: "txt".into(),
            chatbot_id: "bot-1".into(),
        }
    }

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            concurrency: 2,
            idle_delay: Duration::from_secs(300),
            idle_check_interval: Duration::from_secs(120),
            drain_delay: Duration::from_secs(2),
            lock_renew_interval: Duration::from_secs(200),
        }
    }

    /// Processor that records calls and fails a configurable number of times.
    struct ScriptedProcessor {
        process_calls: AtomicUsize,
        failures_remaining: AtomicUsize,
        retriable: bool,
        terminal_payloads: Mutex<Vec<JobPayload>>,
    }

    impl ScriptedProcessor {
        fn succeeding() -> Self {
            Self::failing(0, true)
        }

        fn failing(times: usize, retriable: bool) -> Self {
            Self {
                process_calls: AtomicUsize::new(0),
                failures_remaining: AtomicUsize::new(times),
                retriable,
                terminal_payloads: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobProcessor for ScriptedProcessor {
        async fn process(&self, _job: &LeasedJob) -> Result<(), JobError> {
            self.process_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                let error = if self.retriable {
                    JobError::Store(StoreError::Backend("transient".into()))
                } else {
                    JobError::Extraction(ExtractionError::UnsupportedFileType("xyz".into()))
                };
                return Err(error);
            }
            Ok(())
        }

        async fn on_terminal_failure(&self, payload: &JobPayload) {
            self.terminal_payloads.lock().await.push(payload.clone());
        }
    }

    async fn wait_for_status(
        queue: &MemoryQueue,
        job_id: &str,
        status: JobStatus,
    ) -> crate::queue::JobRecord {
        for _ in 0..2000 {
            if let Some(record) = queue.job(job_id).await.unwrap()
                && record.status == status
            {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("job {job_id} never reached {status:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn processes_an_enqueued_job_to_completion() {
        let queue = Arc::new(MemoryQueue::new(QueueConfig::default()));
        let processor = Arc::new(ScriptedProcessor::succeeding());
        let metrics = Arc::new(PipelineMetrics::new());
        let worker = QueueWorker::new(
            queue.clone(),
            processor.clone(),
            metrics.clone(),
            worker_config(),
        );
        let handle = worker.spawn();

        let job_id = queue.enqueue(payload("doc-1")).await.unwrap();
        let record = wait_for_status(&queue, &job_id, JobStatus::Completed).await;
        assert_eq!(record.attempts_made, 1);
        assert_eq!(processor.process_calls.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_job_is_attempted_exactly_three_times() {
        let queue = Arc::new(MemoryQueue::new(QueueConfig::default()));
        let processor = Arc::new(ScriptedProcessor::failing(usize::MAX, true));
        let metrics = Arc::new(PipelineMetrics::new());
        let worker = QueueWorker::new(
            queue.clone(),
            processor.clone(),
            metrics.clone(),
            worker_config(),
        );
        let handle = worker.spawn();

        let job_id = queue.enqueue(payload("doc-1")).await.unwrap();
        let record = wait_for_status(&queue, &job_id, JobStatus::Failed).await;

        assert_eq!(record.attempts_made, 3);
        assert_eq!(processor.process_calls.load(Ordering::SeqCst), 3);
        // Terminal cleanup ran once, and only after the final attempt.
        let terminal = processor.terminal_payloads.lock().await;
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].document_id, "doc-1");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_retried, 2);
        assert_eq!(snapshot.jobs_failed, 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn non_retriable_failure_skips_backoff_entirely() {
        let queue = Arc::new(MemoryQueue::new(QueueConfig::default()));
        let processor = Arc::new(ScriptedProcessor::failing(usize::MAX, false));
        let metrics = Arc::new(PipelineMetrics::new());
        let worker = QueueWorker::new(
            queue.clone(),
            processor.clone(),
            metrics.clone(),
            worker_config(),
        );
        let handle = worker.spawn();

        let job_id = queue.enqueue(payload("doc-1")).await.unwrap();
        let record = wait_for_status(&queue, &job_id, JobStatus::Failed).await;

        assert_eq!(record.attempts_made, 1);
        assert_eq!(processor.process_calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().jobs_retried, 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_on_retry() {
        let queue = Arc::new(MemoryQueue::new(QueueConfig::default()));
        let processor = Arc::new(ScriptedProcessor::failing(1, true));
        let metrics = Arc::new(PipelineMetrics::new());
        let worker = QueueWorker::new(
            queue.clone(),
            processor.clone(),
            metrics.clone(),
            worker_config(),
        );
        let handle = worker.spawn();

        let job_id = queue.enqueue(payload("doc-1")).await.unwrap();
        let record = wait_for_status(&queue, &job_id, JobStatus::Completed).await;

        assert_eq!(record.attempts_made, 2);
        assert_eq!(metrics.snapshot().jobs_retried, 1);
        assert!(processor.terminal_payloads.lock().await.is_empty());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn idle_worker_pauses_and_resumes_on_enqueue() {
        let queue = Arc::new(MemoryQueue::new(QueueConfig::default()));
        let processor = Arc::new(ScriptedProcessor::succeeding());
        let metrics = Arc::new(PipelineMetrics::new());
        let worker = QueueWorker::new(
            queue.clone(),
            processor.clone(),
            metrics.clone(),
            worker_config(),
        );
        let handle = worker.spawn();

        // Sit idle well past the idle delay so the worker pauses itself.
        tokio::time::sleep(Duration::from_secs(900)).await;

        // A paused worker must still pick up new work promptly.
        let job_id = queue.enqueue(payload("doc-late")).await.unwrap();
        let record = wait_for_status(&queue, &job_id, JobStatus::Completed).await;
        assert_eq!(record.attempts_made, 1);

        handle.shutdown().await;
    }
}
