// ABOUTME: In-process job queue with delayed retries and a broadcast-backed event bus
// ABOUTME: Used when no Redis is available and by the end-to-end tests

use crate::error::ModemResult;
use crate::queue::RetryPolicy;
use crate::traits::{EventPublisher, JobQueue};
use crate::types::{OutgoingJob, QueuedJob};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome counters of a [`MemoryQueue`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
}

struct QueueInner {
    sender: mpsc::UnboundedSender<QueuedJob>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedJob>>,
    next_id: AtomicU64,
    policy: RetryPolicy,
    stats: Mutex<QueueStats>,
    failed: Mutex<Vec<(QueuedJob, String)>>,
    closed: CancellationToken,
}

impl QueueInner {
    fn stats(&self) -> MutexGuard<'_, QueueStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unbounded in-memory job queue
///
/// Failed jobs come back after the policy's backoff until their attempts
/// are exhausted; then they are kept in a dead-letter list.
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<QueueInner>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl MemoryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                sender,
                receiver: tokio::sync::Mutex::new(receiver),
                next_id: AtomicU64::new(1),
                policy,
                stats: Mutex::new(QueueStats::default()),
                failed: Mutex::new(Vec::new()),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Adds a job and returns its id.
    pub fn push(&self, job: OutgoingJob) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, to = %job.to, "Job queued");
        // The receiver lives as long as the queue.
        let _ = self.inner.sender.send(QueuedJob {
            id,
            job,
            attempts: 0,
        });
        id
    }

    /// Stops handing out jobs; pending `next_job` calls return `None`.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    pub fn stats(&self) -> QueueStats {
        *self.inner.stats()
    }

    /// Jobs that exhausted their attempts, with the last failure reason.
    pub fn failed_jobs(&self) -> Vec<(QueuedJob, String)> {
        self.inner
            .failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.inner.policy
    }
}

impl JobQueue for MemoryQueue {
    async fn next_job(&self) -> ModemResult<Option<QueuedJob>> {
        let mut receiver = self.inner.receiver.lock().await;
        tokio::select! {
            _ = self.inner.closed.cancelled() => Ok(None),
            job = receiver.recv() => Ok(job),
        }
    }

    async fn complete(&self, job: &QueuedJob) -> ModemResult<()> {
        self.inner.stats().completed += 1;
        info!(id = job.id, "Job completed successfully");
        Ok(())
    }

    async fn fail(&self, mut job: QueuedJob, reason: String) -> ModemResult<()> {
        job.attempts += 1;
        let policy = self.inner.policy;

        if !policy.should_retry(job.attempts) {
            self.inner.stats().failed += 1;
            error!(id = job.id, attempts = job.attempts, reason = %reason, "Job failed");
            self.inner
                .failed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((job, reason));
            return Ok(());
        }

        self.inner.stats().retried += 1;
        warn!(
            id = job.id,
            attempts = job.attempts,
            backoff = ?policy.backoff,
            reason = %reason,
            "Job failed, retrying"
        );
        let sender = self.inner.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(policy.backoff).await;
            let _ = sender.send(job);
        });
        Ok(())
    }
}

/// In-process publish/subscribe bus
#[derive(Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<(String, String)>,
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receives `(topic, payload)` pairs published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<(String, String)> {
        self.sender.subscribe()
    }
}

impl EventPublisher for MemoryEventBus {
    async fn publish(&self, topic: &str, payload: String) -> ModemResult<()> {
        if self.sender.send((topic.to_string(), payload)).is_err() {
            debug!(topic, "Event published with no subscribers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn jobs_come_out_in_order() {
        let queue = MemoryQueue::default();
        let first = queue.push(OutgoingJob::new("+1", "a"));
        let second = queue.push(OutgoingJob::new("+2", "b"));

        assert_eq!(queue.next_job().await.unwrap().unwrap().id, first);
        assert_eq!(queue.next_job().await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn failed_job_is_retried_then_dead_lettered() {
        let queue = MemoryQueue::new(RetryPolicy::new(2).with_backoff(Duration::ZERO));
        queue.push(OutgoingJob::new("+1", "a"));

        let job = queue.next_job().await.unwrap().unwrap();
        queue.fail(job, "busy".to_string()).await.unwrap();

        let job = queue.next_job().await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        queue.fail(job, "timeout".to_string()).await.unwrap();

        let stats = queue.stats();
        assert_eq!((stats.retried, stats.failed), (1, 1));
        let failed = queue.failed_jobs();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].1, "timeout");
    }

    #[tokio::test]
    async fn close_releases_waiting_consumer() {
        let queue = MemoryQueue::default();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next_job().await })
        };
        queue.close();
        assert!(consumer.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn bus_delivers_to_subscribers() {
        let bus = MemoryEventBus::default();
        let mut events = bus.subscribe();
        bus.publish("incoming", "{}".to_string()).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ("incoming".to_string(), "{}".to_string())
        );
    }
}
