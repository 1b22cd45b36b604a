// ABOUTME: Seams between the modem layers and their collaborators using native async trait methods
// ABOUTME: Message handlers receive inbound SMS; job queues feed sends; publishers emit events

use crate::error::ModemResult;
use crate::types::{QueuedJob, SmsMessage};
use std::future::Future;

/// Receiver of inbound SMS messages
///
/// Implemented by whatever sits above the SMS handler: the worker's event
/// relay in production, collecting handlers in tests.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one message. An error is logged by the caller and, on the
    /// poll path, keeps the message in the store.
    fn handle(&self, message: SmsMessage) -> impl Future<Output = ModemResult<()>> + Send;
}

/// Adapter turning an async closure into a [`MessageHandler`]
pub struct FnHandler<F>(F);

/// Wrap a closure returning a future as a message handler
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(SmsMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ModemResult<()>> + Send,
{
    FnHandler(f)
}

impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(SmsMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ModemResult<()>> + Send,
{
    fn handle(&self, message: SmsMessage) -> impl Future<Output = ModemResult<()>> + Send {
        (self.0)(message)
    }
}

/// Source of outgoing SMS jobs
///
/// Retry policy belongs to the queue: the worker reports each outcome and
/// never retries on its own.
pub trait JobQueue: Send + Sync + 'static {
    /// Wait for the next job. `Ok(None)` means the queue is closed.
    fn next_job(&self) -> impl Future<Output = ModemResult<Option<QueuedJob>>> + Send;

    /// Record a successful send
    fn complete(&self, job: &QueuedJob) -> impl Future<Output = ModemResult<()>> + Send;

    /// Record a failed send so the queue can retry or give up
    fn fail(&self, job: QueuedJob, reason: String)
    -> impl Future<Output = ModemResult<()>> + Send;
}

/// Publish/subscribe sink for inbound message events
pub trait EventPublisher: Send + Sync + 'static {
    fn publish(&self, topic: &str, payload: String)
    -> impl Future<Output = ModemResult<()>> + Send;
}
