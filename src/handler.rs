// ABOUTME: SMS handler combining push notifications with the always-on inbox poller
// ABOUTME: Both paths hand messages of the same shape to one caller-supplied handler

use crate::channel::CommandChannel;
use crate::config::HandlerConfig;
use crate::poller::InboxPoller;
use crate::traits::MessageHandler;
use crate::types::{STATUS_REC_UNREAD, SmsMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Inbound SMS front end
///
/// Starting tries to switch the modem to push delivery. If the modem refuses,
/// the handler carries on poll-only instead of failing. The poller runs in
/// either case.
pub struct SmsHandler<H> {
    channel: CommandChannel,
    handler: Arc<H>,
    poller: InboxPoller<H>,
    realtime: AtomicBool,
    running: AtomicBool,
    forwarder: Mutex<Option<CancellationToken>>,
}

impl<H: MessageHandler> SmsHandler<H> {
    pub fn new(channel: CommandChannel, handler: Arc<H>, config: HandlerConfig) -> Self {
        let poller = InboxPoller::new(channel.clone(), Arc::clone(&handler), config.poller);
        Self {
            channel,
            handler,
            poller,
            realtime: AtomicBool::new(config.enable_realtime),
            running: AtomicBool::new(false),
            forwarder: Mutex::new(None),
        }
    }

    fn forwarder(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.forwarder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("SMS handler already running");
            return;
        }

        // Subscribe before notifications are on so no push is missed.
        let shutdown = CancellationToken::new();
        tokio::spawn(forward_pushed(
            self.channel.subscribe(),
            Arc::clone(&self.handler),
            shutdown.clone(),
        ));
        *self.forwarder() = Some(shutdown);

        if self.realtime.load(Ordering::Acquire) {
            info!("Enabling real-time SMS notifications");
            match self.channel.enable_notifications().await {
                Ok(()) => info!("Real-time notifications enabled"),
                Err(e) => {
                    warn!(error = %e, "Failed to enable real-time notifications, falling back to polling");
                    self.realtime.store(false, Ordering::Release);
                }
            }
        }

        self.poller.start();
        info!(realtime = self.realtime_enabled(), "SMS handler started");
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            debug!("SMS handler not running");
            return;
        }

        self.poller.stop();
        if let Some(shutdown) = self.forwarder().take() {
            shutdown.cancel();
        }
        info!("SMS handler stopped");
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether push delivery is on. Turns false when enabling it failed.
    pub fn realtime_enabled(&self) -> bool {
        self.realtime.load(Ordering::Acquire)
    }

    pub fn poller(&self) -> &InboxPoller<H> {
        &self.poller
    }
}

impl<H> Drop for SmsHandler<H> {
    fn drop(&mut self) {
        let forwarder = self.forwarder.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(shutdown) = forwarder.take() {
            shutdown.cancel();
        }
    }
}

async fn forward_pushed<H: MessageHandler>(
    mut messages: broadcast::Receiver<SmsMessage>,
    handler: Arc<H>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = messages.recv() => message,
        };

        match message {
            Ok(message) => {
                let message = normalize_pushed(message);
                info!(from = ?message.from, index = ?message.index, "Real-time SMS received");
                if let Err(e) = handler.handle(message).await {
                    error!(error = %e, "Error processing real-time message");
                }
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Real-time messages dropped, the poller will pick up stored ones");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Real-time forwarder stopped");
}

/// Pushed messages are unread by definition; the store index is only known
/// when the push was a stored-message notice.
fn normalize_pushed(message: SmsMessage) -> SmsMessage {
    match message.status {
        Some(_) => message,
        None => message.with_status(STATUS_REC_UNREAD),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushed_message_gets_unread_status() {
        let message = normalize_pushed(SmsMessage::new(Some("+15550001".to_string()), "hi"));
        assert_eq!(message.status.as_deref(), Some(STATUS_REC_UNREAD));
        assert_eq!(message.index, None);
    }

    #[test]
    fn stored_status_is_kept() {
        let message = normalize_pushed(SmsMessage::new(None, "hi").with_index(3).with_status("REC READ"));
        assert_eq!(message.status.as_deref(), Some("REC READ"));
        assert_eq!(message.index, Some(3));
    }
}
