// ABOUTME: Timer-driven inbox poller that lists unread SIM messages and hands each to a handler
// ABOUTME: Record failures are logged and skipped; handled records are deleted when configured

use crate::channel::{CommandChannel, LIST_UNREAD};
use crate::config::PollerConfig;
use crate::error::ModemResult;
use crate::traits::MessageHandler;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one poll tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Records in the listing, malformed ones included
    pub listed: usize,
    /// Records the handler accepted
    pub delivered: usize,
    /// Records that failed to parse, to handle or to delete
    pub failed: usize,
    /// Records removed from the store
    pub deleted: usize,
}

struct PollTask {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic reader of the modem's unread messages
///
/// A tick runs to completion before the next one is considered; ticks that
/// come due while a poll is still running are skipped. A tick that cannot
/// talk to the modem (busy, timeout) is logged and skipped.
pub struct InboxPoller<H> {
    channel: CommandChannel,
    handler: Arc<H>,
    config: PollerConfig,
    task: Mutex<Option<PollTask>>,
}

impl<H: MessageHandler> InboxPoller<H> {
    pub fn new(channel: CommandChannel, handler: Arc<H>, config: PollerConfig) -> Self {
        Self {
            channel,
            handler,
            config,
            task: Mutex::new(None),
        }
    }

    fn task(&self) -> MutexGuard<'_, Option<PollTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts polling; the first tick fires one interval from now.
    pub fn start(&self) {
        let mut task = self.task();
        if task.is_some() {
            debug!("Inbox poller already running");
            return;
        }

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run(
            self.channel.clone(),
            Arc::clone(&self.handler),
            self.config,
            shutdown.clone(),
        ));
        *task = Some(PollTask { shutdown, handle });
        info!(interval = ?self.config.interval, "Inbox poller started");
    }

    /// Stops the timer. A poll already talking to the modem finishes its
    /// current command on its own.
    pub fn stop(&self) {
        let Some(task) = self.task().take() else {
            debug!("Inbox poller not running");
            return;
        };
        task.shutdown.cancel();
        drop(task.handle);
        info!("Inbox poller stopped");
    }

    pub fn is_active(&self) -> bool {
        self.task().as_ref().is_some_and(|t| !t.handle.is_finished())
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Runs a single poll now, outside the timer.
    pub async fn poll_once(&self) -> ModemResult<PollReport> {
        poll_inbox(&self.channel, self.handler.as_ref(), &self.config).await
    }
}

impl<H> Drop for InboxPoller<H> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            task.shutdown.cancel();
        }
    }
}

async fn run<H: MessageHandler>(
    channel: CommandChannel,
    handler: Arc<H>,
    config: PollerConfig,
    shutdown: CancellationToken,
) {
    // interval_at panics on a zero period.
    let period = config.interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match poll_inbox(&channel, handler.as_ref(), &config).await {
            Ok(report) if report.listed > 0 => info!(
                listed = report.listed,
                delivered = report.delivered,
                failed = report.failed,
                deleted = report.deleted,
                "Inbox poll complete"
            ),
            Ok(_) => debug!("No new messages found"),
            Err(e) => warn!(error = %e, "Inbox poll failed, skipping tick"),
        }
    }
    debug!("Inbox poll loop stopped");
}

async fn poll_inbox<H: MessageHandler>(
    channel: &CommandChannel,
    handler: &H,
    config: &PollerConfig,
) -> ModemResult<PollReport> {
    debug!("Polling for new messages");
    let records = channel.list_messages(LIST_UNREAD).await?;
    let mut report = PollReport {
        listed: records.len(),
        ..Default::default()
    };

    for record in records {
        let message = match record {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Skipping unreadable inbox record");
                report.failed += 1;
                continue;
            }
        };
        let index = message.index;

        if let Err(e) = handler.handle(message).await {
            error!(index = ?index, error = %e, "Error processing message");
            report.failed += 1;
            continue;
        }
        report.delivered += 1;

        if let (true, Some(index)) = (config.delete_after_read, index) {
            match channel.delete_message(index).await {
                Ok(()) => {
                    debug!(index, "Deleted message");
                    report.deleted += 1;
                }
                Err(e) => {
                    error!(index, error = %e, "Failed to delete message");
                    report.failed += 1;
                }
            }
        }
    }

    Ok(report)
}
