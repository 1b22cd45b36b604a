// ABOUTME: Modem worker bridging the outgoing job queue and the incoming event topic to one modem
// ABOUTME: Consumes send jobs one at a time and publishes every inbound SMS as a JSON event

use crate::channel::CommandChannel;
use crate::config::HandlerConfig;
use crate::error::ModemResult;
use crate::handler::SmsHandler;
use crate::queue::INCOMING_TOPIC;
use crate::traits::{EventPublisher, JobQueue, MessageHandler};
use crate::types::SmsMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Texts sent by [`ModemWorker::send_test_messages`].
pub const TEST_MESSAGES: [&str; 1] = ["SMS system is most likely working correctly."];

/// Pause between two test messages.
pub const TEST_MESSAGE_SPACING: Duration = Duration::from_secs(1);

/// Pause after the queue itself reported an error.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Message handler publishing each inbound SMS on the incoming topic
pub struct EventRelay<P> {
    publisher: Arc<P>,
}

impl<P: EventPublisher> EventRelay<P> {
    pub fn new(publisher: Arc<P>) -> Self {
        Self { publisher }
    }
}

impl<P: EventPublisher> MessageHandler for EventRelay<P> {
    async fn handle(&self, message: SmsMessage) -> ModemResult<()> {
        let payload = serde_json::to_string(&message)?;
        self.publisher.publish(INCOMING_TOPIC, payload).await?;
        debug!(from = ?message.from, topic = INCOMING_TOPIC, "Inbound SMS published");
        Ok(())
    }
}

struct Consumer {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Long-running worker owning the SMS side of one modem
///
/// Jobs are taken one at a time and sent through the command channel. The
/// worker never retries a send itself; each outcome is reported back to the
/// queue, whose policy decides what happens to a failed job.
pub struct ModemWorker<Q, P> {
    channel: CommandChannel,
    queue: Arc<Q>,
    handler: SmsHandler<EventRelay<P>>,
    running: AtomicBool,
    consumer: Mutex<Option<Consumer>>,
}

impl<Q: JobQueue, P: EventPublisher> ModemWorker<Q, P> {
    pub fn new(channel: CommandChannel, queue: Arc<Q>, publisher: Arc<P>, config: HandlerConfig) -> Self {
        let relay = Arc::new(EventRelay::new(publisher));
        Self {
            handler: SmsHandler::new(channel.clone(), relay, config),
            channel,
            queue,
            running: AtomicBool::new(false),
            consumer: Mutex::new(None),
        }
    }

    fn consumer(&self) -> MutexGuard<'_, Option<Consumer>> {
        self.consumer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the SMS handler and the job consumer.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            info!("Modem worker is already running");
            return;
        }

        self.handler.start().await;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(consume(
            self.channel.clone(),
            Arc::clone(&self.queue),
            shutdown.clone(),
        ));
        *self.consumer() = Some(Consumer { shutdown, handle });

        info!(realtime = self.realtime_enabled(), "Modem worker started");
    }

    /// Stops the poller and the consumer. Returns once the consumer has
    /// finished the job it was sending, if any.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            info!("Modem worker is not running");
            return;
        }

        self.handler.stop();
        let consumer = self.consumer().take();
        if let Some(consumer) = consumer {
            consumer.shutdown.cancel();
            if let Err(e) = consumer.handle.await {
                error!(error = %e, "Job consumer ended abnormally");
            }
        }
        info!("Modem worker stopped");
    }

    /// Sends an SMS directly, bypassing the queue.
    pub async fn send_sms(&self, to: &str, text: &str) -> ModemResult<()> {
        match self.channel.send_sms(to, text).await {
            Ok(_) => {
                info!(to, "SMS sent directly");
                Ok(())
            }
            Err(e) => {
                error!(to, error = %e, "Failed to send SMS directly");
                Err(e)
            }
        }
    }

    /// Sends the fixed test texts to `phone_number`. Failures are logged and
    /// never stop the sequence.
    pub async fn send_test_messages(&self, phone_number: &str) {
        for message in TEST_MESSAGES {
            if let Err(e) = self.send_sms(phone_number, message).await {
                error!(to = phone_number, error = %e, "Failed to send test message");
                continue;
            }
            tokio::time::sleep(TEST_MESSAGE_SPACING).await;
        }
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn realtime_enabled(&self) -> bool {
        self.handler.realtime_enabled()
    }

    pub fn handler(&self) -> &SmsHandler<EventRelay<P>> {
        &self.handler
    }
}

impl<Q, P> Drop for ModemWorker<Q, P> {
    fn drop(&mut self) {
        let consumer = self.consumer.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(consumer) = consumer.take() {
            consumer.shutdown.cancel();
        }
    }
}

async fn consume<Q: JobQueue>(channel: CommandChannel, queue: Arc<Q>, shutdown: CancellationToken) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = queue.next_job() => next,
        };

        let job = match next {
            Ok(Some(job)) => job,
            Ok(None) => {
                info!("Job queue closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "Worker error");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(QUEUE_ERROR_BACKOFF) => {}
                }
                continue;
            }
        };

        debug!(id = job.id, to = %job.job.to, attempts = job.attempts, "Processing job");
        match channel.send_sms(&job.job.to, &job.job.text).await {
            Ok(segments) => {
                info!(id = job.id, to = %job.job.to, segments, "SMS sent successfully");
                if let Err(e) = queue.complete(&job).await {
                    error!(id = job.id, error = %e, "Failed to record completed job");
                }
            }
            Err(e) => {
                error!(id = job.id, to = %job.job.to, error = %e, "Failed to send SMS");
                let id = job.id;
                if let Err(e) = queue.fail(job, e.to_string()).await {
                    error!(id, error = %e, "Failed to record failed job");
                }
            }
        }
    }
    debug!("Job consumer stopped");
}
