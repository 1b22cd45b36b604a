// ABOUTME: Job queue and event bus boundary of the modem worker
// ABOUTME: In-memory implementations for embedding and tests, Redis adapters for deployment

mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{MemoryEventBus, MemoryQueue, QueueStats};

use std::time::Duration;

/// Queue carrying `{to, text}` send jobs.
pub const OUTGOING_TOPIC: &str = "outgoing";
/// Topic receiving one JSON event per inbound SMS.
pub const INCOMING_TOPIC: &str = "incoming";

/// Retry policy applied by a queue to failed jobs
///
/// # Example
///
/// ```rust
/// use serialsms::queue::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(5).with_backoff(Duration::from_secs(2));
/// assert!(policy.should_retry(4));
/// assert!(!policy.should_retry(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per job, the first one included (default: 3)
    pub max_attempts: u32,
    /// Delay before a failed job becomes available again (default: 1s)
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether a job that has now failed `attempts` times gets another try.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
