//! In-process [`JobQueue`] backend with backoff, delayed promotion, and stall recovery.
//!
//! Backs the single-binary deployment and the test suite. State lives behind one mutex;
//! due delayed jobs are promoted and expired locks reaped on every claim and count, so no
//! background task is needed to keep the queue honest.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    FailOutcome, JobCounts, JobPayload, JobQueue, JobRecord, JobStatus, LeasedJob, QueueConfig,
    QueueError, QueueEvent,
};

struct DelayedEntry {
    job_id: String,
    ready_at: Instant,
}

struct LeaseEntry {
    job_id: String,
    expires_at: Instant,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, JobRecord>,
    waiting: VecDeque<String>,
    delayed: Vec<DelayedEntry>,
    active: Vec<LeaseEntry>,
}

/// Mutex-guarded in-process queue applying the configured retry/lock/stall policy.
pub struct MemoryQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    events: broadcast::Sender<QueueEvent>,
}

impl MemoryQueue {
    /// Create a queue with the given policy settings.
    pub fn new(config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            events,
        }
    }

    /// Promote due delayed jobs and requeue or fail jobs whose lock expired.
    fn settle(&self, state: &mut QueueState, now: Instant) {
        let mut due: Vec<DelayedEntry> = Vec::new();
        state.delayed.retain_mut(|entry| {
            if entry.ready_at <= now {
                due.push(DelayedEntry {
                    job_id: std::mem::take(&mut entry.job_id),
                    ready_at: entry.ready_at,
                });
                false
            } else {
                true
            }
        });
        due.sort_by_key(|entry| entry.ready_at);
        for entry in due {
            if let Some(job) = state.jobs.get_mut(&entry.job_id) {
                job.status = JobStatus::Waiting;
                state.waiting.push_back(entry.job_id);
            }
        }

        let mut expired: Vec<String> = Vec::new();
        state.active.retain(|lease| {
            if lease.expires_at <= now {
                expired.push(lease.job_id.clone());
                false
            } else {
                true
            }
        });
        for job_id in expired {
            let Some(job) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            job.stalls += 1;
            if job.stalls > self.config.max_stalls {
                job.status = JobStatus::Failed;
                tracing::error!(
                    job_id = %job.id,
                    stalls = job.stalls,
                    "Job stalled more than the allowable limit, failing"
                );
                let _ = self.events.send(QueueEvent::TerminalFailure(job.clone()));
            } else {
                tracing::warn!(job_id = %job.id, stalls = job.stalls, "Job stalled, requeueing");
                job.status = JobStatus::Waiting;
                state.waiting.push_front(job_id);
            }
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, payload: JobPayload) -> Result<String, QueueError> {
        let job_id = Uuid::new_v4().to_string();
        let record = JobRecord {
            id: job_id.clone(),
            payload,
            status: JobStatus::Waiting,
            attempts_made: 0,
            stalls: 0,
            progress: 0,
        };

        {
            let mut state = self.state.lock().await;
            state.jobs.insert(job_id.clone(), record);
            state.waiting.push_back(job_id.clone());
        }

        tracing::debug!(job_id = %job_id, "Job enqueued");
        let _ = self.events.send(QueueEvent::Enqueued);
        Ok(job_id)
    }

    async fn claim(&self) -> Result<Option<LeasedJob>, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        self.settle(&mut state, now);

        let Some(job_id) = state.waiting.pop_front() else {
            return Ok(None);
        };
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.clone()))?;
        job.status = JobStatus::Active;
        let leased = LeasedJob {
            id: job.id.clone(),
            payload: job.payload.clone(),
            attempt: job.attempts_made + 1,
        };
        state.active.push(LeaseEntry {
            job_id,
            expires_at: now + self.config.lock_duration,
        });
        Ok(Some(leased))
    }

    async fn renew_lock(&self, job_id: &str) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let lease = state
            .active
            .iter_mut()
            .find(|lease| lease.job_id == job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        lease.expires_at = now + self.config.lock_duration;
        Ok(())
    }

    async fn set_progress(&self, job_id: &str, progress: u8) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        job.progress = progress.min(100);
        Ok(())
    }

    async fn complete(&self, job_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.active.retain(|lease| lease.job_id != job_id);
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        job.attempts_made += 1;
        job.status = JobStatus::Completed;
        Ok(())
    }

    async fn fail(&self, job_id: &str, retriable: bool) -> Result<FailOutcome, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.active.retain(|lease| lease.job_id != job_id);
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        job.attempts_made += 1;

        if retriable && job.attempts_made < self.config.attempts {
            // Exponential backoff: initial delay doubled per completed attempt.
            let delay = self.config.backoff_initial * 2u32.pow(job.attempts_made - 1);
            job.status = JobStatus::Delayed;
            state.delayed.push(DelayedEntry {
                job_id: job_id.to_string(),
                ready_at: now + delay,
            });
            Ok(FailOutcome::Retrying { delay })
        } else {
            job.status = JobStatus::Failed;
            Ok(FailOutcome::Terminal)
        }
    }

    async fn counts(&self) -> Result<JobCounts, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        self.settle(&mut state, now);
        Ok(JobCounts {
            waiting: state.waiting.len(),
            active: state.active.len(),
            delayed: state.delayed.len(),
        })
    }

    async fn job(&self, job_id: &str) -> Result<Option<JobRecord>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(job_id).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }
}
