// ABOUTME: Redis-backed outgoing job queue (list + RPOP) and PUBLISH-based event publisher
// ABOUTME: Jobs are JSON {to, text, attempts}; exhausted jobs land on a dead-letter list

use crate::error::ModemResult;
use crate::queue::{OUTGOING_TOPIC, RetryPolicy};
use crate::traits::{EventPublisher, JobQueue};
use crate::types::{OutgoingJob, QueuedJob};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause between two pops of an empty list.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Wire form of a job on the Redis list.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(flatten)]
    job: OutgoingJob,
    #[serde(default)]
    attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Job queue on a Redis list
///
/// Producers `LPUSH` JSON `{to, text}` onto the list; this consumer pops
/// from the other end, so jobs come out in arrival order.
pub struct RedisQueue {
    key: String,
    conn: MultiplexedConnection,
    policy: RetryPolicy,
    next_id: AtomicU64,
    closed: CancellationToken,
}

impl RedisQueue {
    /// Connects to `url` and consumes the `outgoing` list.
    pub async fn connect(url: &str, policy: RetryPolicy) -> ModemResult<Self> {
        Self::connect_with_key(url, OUTGOING_TOPIC, policy).await
    }

    pub async fn connect_with_key(url: &str, key: &str, policy: RetryPolicy) -> ModemResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(url, key, "Connected to Redis job queue");

        Ok(Self {
            key: key.to_string(),
            conn,
            policy,
            next_id: AtomicU64::new(1),
            closed: CancellationToken::new(),
        })
    }

    /// Name of the dead-letter list.
    pub fn failed_key(&self) -> String {
        format!("{}:failed", self.key)
    }

    /// Enqueues a job the way external producers do.
    pub async fn push(&self, job: OutgoingJob) -> ModemResult<()> {
        let payload = serde_json::to_string(&Envelope {
            job,
            attempts: 0,
            error: None,
        })?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.lpush(&self.key, payload).await?;
        Ok(())
    }

    /// Makes pending and future `next_job` calls return `None`.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

impl JobQueue for RedisQueue {
    async fn next_job(&self) -> ModemResult<Option<QueuedJob>> {
        let mut conn = self.conn.clone();
        loop {
            if self.closed.is_cancelled() {
                return Ok(None);
            }

            let popped: Option<String> = conn.rpop(&self.key, None).await?;
            let Some(payload) = popped else {
                tokio::select! {
                    _ = self.closed.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
                continue;
            };

            match serde_json::from_str::<Envelope>(&payload) {
                Ok(envelope) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    debug!(id, to = %envelope.job.to, "Job received");
                    return Ok(Some(QueuedJob {
                        id,
                        job: envelope.job,
                        attempts: envelope.attempts,
                    }));
                }
                Err(e) => {
                    error!(payload = %payload, error = %e, "Dropping malformed job");
                    let _: i64 = conn.lpush(self.failed_key(), payload).await?;
                }
            }
        }
    }

    async fn complete(&self, job: &QueuedJob) -> ModemResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.incr(format!("{}:completed", self.key), 1).await?;
        info!(id = job.id, "Job completed successfully");
        Ok(())
    }

    async fn fail(&self, job: QueuedJob, reason: String) -> ModemResult<()> {
        let attempts = job.attempts + 1;
        let envelope = Envelope {
            job: job.job,
            attempts,
            error: Some(reason.clone()),
        };

        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.conn.clone();

        if self.policy.should_retry(attempts) {
            warn!(id = job.id, attempts, reason = %reason, "Job failed, retrying");
            let key = self.key.clone();
            let backoff = self.policy.backoff;
            tokio::spawn(async move {
                tokio::time::sleep(backoff).await;
                let pushed: redis::RedisResult<i64> = conn.lpush(&key, payload).await;
                if let Err(e) = pushed {
                    error!(key = %key, error = %e, "Failed to requeue job");
                }
            });
            return Ok(());
        }

        error!(id = job.id, attempts, reason = %reason, "Job failed");
        let _: i64 = conn.lpush(self.failed_key(), payload).await?;
        Ok(())
    }
}

/// Event publisher using Redis PUBLISH
#[derive(Clone)]
pub struct RedisPublisher {
    conn: MultiplexedConnection,
}

impl RedisPublisher {
    pub async fn connect(url: &str) -> ModemResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(url, "Connected to Redis publisher");
        Ok(Self { conn })
    }
}

impl EventPublisher for RedisPublisher {
    async fn publish(&self, topic: &str, payload: String) -> ModemResult<()> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(topic, payload).await?;
        debug!(topic, receivers, "Event published");
        Ok(())
    }
}
