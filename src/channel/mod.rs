// ABOUTME: AT command channel owning the modem stream with single-in-flight request/response correlation
// ABOUTME: Runs the read loop, dispatches unsolicited notifications and exposes SMS send/read operations

pub mod demux;
pub mod listing;

use crate::codec;
use crate::connection::{ChunkReader, CommandWriter};
use crate::error::{ModemError, ModemResult};
use crate::types::SmsMessage;
use demux::{Demux, Notification};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default time to wait for a command's terminator.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(5000);

/// Setup commands run in order by [`CommandChannel::initialize`]: liveness,
/// SIM ready, PDU mode, GSM character set, SIM storage for everything.
pub const INIT_SEQUENCE: [&str; 5] = [
    "AT",
    "AT+CPIN?",
    "AT+CMGF=0",
    "AT+CSCS=\"GSM\"",
    "AT+CPMS=\"SM\",\"SM\",\"SM\"",
];

/// Routes new messages straight to the terminal as `+CMT` deliveries.
pub const ENABLE_NOTIFICATIONS: &str = "AT+CNMI=1,2,0,0,0";

/// `AT+CMGL` status filter for received unread messages.
pub const LIST_UNREAD: u8 = 0;

const EVENT_CAPACITY: usize = 64;

type BoxedWriter = CommandWriter<Box<dyn AsyncWrite + Send + Unpin>>;

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    /// Command line terminated by CR
    Command,
    /// PDU payload terminated by SUB
    Payload,
}

struct Exchange {
    id: u64,
    reply: oneshot::Sender<String>,
}

#[derive(Default)]
struct State {
    demux: Demux,
    exchange: Option<Exchange>,
    /// Holder of a multi-exchange reservation. Only its exchanges may run.
    reserved: Option<u64>,
}

/// Keeps the channel to one caller across several exchanges, such as the
/// `AT+CMGS` prompt and its payload. Released on drop.
struct Reservation<'a> {
    channel: &'a CommandChannel,
    id: u64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut state = self.channel.inner.state();
        if state.reserved == Some(self.id) {
            state.reserved = None;
        }
    }
}

struct Inner {
    writer: tokio::sync::Mutex<BoxedWriter>,
    state: Mutex<State>,
    events: broadcast::Sender<SmsMessage>,
    timeout: Duration,
    initialized: AtomicBool,
    open: AtomicBool,
    next_exchange: AtomicU64,
    shutdown: CancellationToken,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Command channel over one modem stream
///
/// At most one AT exchange is outstanding at a time. A second request while
/// one is in flight fails immediately with [`ModemError::ChannelBusy`]; the
/// channel never queues commands. Unsolicited notifications are handled on
/// every read regardless of the exchange state, and decoded inbound messages
/// are broadcast to every [`subscribe`](Self::subscribe)r.
///
/// Cloning is cheap and every clone talks to the same modem.
#[derive(Clone)]
pub struct CommandChannel {
    inner: Arc<Inner>,
}

impl CommandChannel {
    /// Creates a channel over `stream` and starts its read loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S>(stream: S, timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = ChunkReader::new(read_half);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shutdown = CancellationToken::new();

        let inner = Arc::new(Inner {
            writer: tokio::sync::Mutex::new(CommandWriter::new(writer)),
            state: Mutex::new(State::default()),
            events,
            timeout,
            initialized: AtomicBool::new(false),
            open: AtomicBool::new(true),
            next_exchange: AtomicU64::new(1),
            shutdown: shutdown.clone(),
        });

        tokio::spawn(read_loop(Arc::downgrade(&inner), reader, shutdown));
        Self { inner }
    }

    /// Sends `command` and waits until the read buffer contains `expected`.
    ///
    /// Returns the trimmed buffer content at the moment of the match.
    pub async fn send_command(&self, command: &str, expected: &str) -> ModemResult<String> {
        self.exchange(command, expected, WriteKind::Command, None).await
    }

    fn reserve(&self) -> ModemResult<Reservation<'_>> {
        if !self.inner.open.load(Ordering::Acquire) {
            return Err(ModemError::ChannelClosed);
        }
        let mut state = self.inner.state();
        if state.reserved.is_some() || state.exchange.is_some() || !state.demux.is_idle() {
            debug!("Rejecting reservation, modem is busy");
            return Err(ModemError::ChannelBusy);
        }
        let id = self.inner.next_exchange.fetch_add(1, Ordering::Relaxed);
        state.reserved = Some(id);
        Ok(Reservation { channel: self, id })
    }

    async fn exchange(
        &self,
        line: &str,
        expected: &str,
        kind: WriteKind,
        reservation: Option<&Reservation<'_>>,
    ) -> ModemResult<String> {
        if !self.inner.open.load(Ordering::Acquire) {
            return Err(ModemError::ChannelClosed);
        }

        let label = match kind {
            WriteKind::Command => line.to_string(),
            WriteKind::Payload => format!("PDU payload ({} hex digits)", line.len()),
        };
        let id = self.inner.next_exchange.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, mut reply_rx) = oneshot::channel();

        {
            let mut state = self.inner.state();
            let held_elsewhere = state
                .reserved
                .is_some_and(|held| reservation.is_none_or(|r| r.id != held));
            if held_elsewhere || state.exchange.is_some() || !state.demux.is_idle() {
                debug!(command = %label, "Rejecting command, modem is busy");
                return Err(ModemError::ChannelBusy);
            }
            state.demux.begin_exchange(expected);
            state.exchange = Some(Exchange {
                id,
                reply: reply_tx,
            });
        }

        debug!(command = %label, expected, ">>>");
        let written = {
            let mut writer = self.inner.writer.lock().await;
            match kind {
                WriteKind::Command => writer.write_command(line).await,
                WriteKind::Payload => writer.write_payload(line).await,
            }
        };
        if let Err(e) = written {
            self.abandon(id);
            error!(command = %label, error = %e, "Failed to write to modem");
            return Err(e.into());
        }

        match tokio::time::timeout(self.inner.timeout, &mut reply_rx).await {
            Ok(Ok(reply)) => {
                debug!(command = %label, reply = %reply, "<<<");
                Ok(reply)
            }
            Ok(Err(_)) => {
                self.abandon(id);
                Err(ModemError::ChannelClosed)
            }
            Err(_) => {
                self.abandon(id);
                // The reply may have landed between the deadline and the abandon.
                if let Ok(reply) = reply_rx.try_recv() {
                    return Ok(reply);
                }
                warn!(command = %label, timeout = ?self.inner.timeout, "Command timed out");
                Err(ModemError::Timeout { command: label })
            }
        }
    }

    fn abandon(&self, id: u64) {
        let mut state = self.inner.state();
        if state.exchange.as_ref().is_some_and(|e| e.id == id) {
            state.exchange = None;
            state.demux.abandon_exchange();
        }
    }

    /// Runs the setup sequence. A second call after success is a no-op.
    ///
    /// Any failing command aborts the sequence and leaves the channel
    /// uninitialized.
    pub async fn initialize(&self) -> ModemResult<()> {
        if self.inner.initialized.load(Ordering::Acquire) {
            info!("Modem already initialized");
            return Ok(());
        }

        info!("Initializing modem");
        for command in INIT_SEQUENCE {
            if let Err(source) = self.send_command(command, "OK").await {
                error!(command, error = %source, "Modem initialization failed");
                return Err(ModemError::Initialization {
                    command: command.to_string(),
                    source: Box::new(source),
                });
            }
        }

        self.inner.initialized.store(true, Ordering::Release);
        info!("Modem initialization complete");
        Ok(())
    }

    /// Encodes and sends an SMS, one `AT+CMGS` round per segment.
    ///
    /// Encoding happens before anything is written, so a corrupt PDU never
    /// reaches the modem. The channel stays reserved until the last segment
    /// is answered; other commands meanwhile fail with
    /// [`ModemError::ChannelBusy`] instead of landing at the `>` prompt.
    /// The first failing segment aborts the rest; segments already sent stay
    /// sent. Returns the number of segments sent.
    pub async fn send_sms(&self, to: &str, text: &str) -> ModemResult<usize> {
        if !self.inner.initialized.load(Ordering::Acquire) {
            return Err(ModemError::NotInitialized);
        }

        let pdus = codec::encode(to, text).inspect_err(|e| {
            error!(to, error = %e, "Failed to encode SMS");
        })?;

        let reservation = self.reserve().inspect_err(|e| {
            warn!(to, error = %e, "Cannot send SMS now");
        })?;
        info!(to, segments = pdus.len(), "Sending SMS");
        for (i, pdu) in pdus.iter().enumerate() {
            let result = async {
                let prompt = format!("AT+CMGS={}", pdu.tpdu_length);
                self.exchange(&prompt, ">", WriteKind::Command, Some(&reservation))
                    .await?;
                self.exchange(&pdu.hex, "OK", WriteKind::Payload, Some(&reservation))
                    .await
            }
            .await;

            if let Err(e) = result {
                error!(to, segment = i + 1, error = %e, "Failed to send SMS");
                return Err(e);
            }
            debug!(to, segment = i + 1, length = pdu.tpdu_length, "Segment sent");
        }

        info!(to, "SMS sent successfully");
        Ok(pdus.len())
    }

    /// Reads the message stored at `index`.
    pub async fn read_message(&self, index: u32) -> ModemResult<SmsMessage> {
        let response = self.send_command(&format!("AT+CMGR={index}"), "OK").await?;
        listing::parse_read_response(&response, index)
    }

    /// Lists stored messages matching the `AT+CMGL` status filter. Each
    /// record parses independently.
    pub async fn list_messages(&self, status: u8) -> ModemResult<Vec<ModemResult<SmsMessage>>> {
        let response = self.send_command(&format!("AT+CMGL={status}"), "OK").await?;
        Ok(listing::parse_listing(&response))
    }

    /// Deletes the message stored at `index`.
    pub async fn delete_message(&self, index: u32) -> ModemResult<()> {
        self.send_command(&format!("AT+CMGD={index}"), "OK").await?;
        Ok(())
    }

    /// Asks the modem to push new messages as they arrive.
    pub async fn enable_notifications(&self) -> ModemResult<()> {
        self.send_command(ENABLE_NOTIFICATIONS, "OK").await?;
        Ok(())
    }

    /// Subscribes to inbound messages from the notification path.
    pub fn subscribe(&self) -> broadcast::Receiver<SmsMessage> {
        self.inner.events.subscribe()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Initialized and the stream still open.
    pub fn is_ready(&self) -> bool {
        self.is_initialized() && self.is_open()
    }

    /// Stops the read loop and shuts the write side down. An exchange still
    /// in flight ends with [`ModemError::ChannelClosed`].
    pub async fn close(&self) -> ModemResult<()> {
        if !self.inner.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.initialized.store(false, Ordering::Release);
        self.inner.shutdown.cancel();
        self.inner.writer.lock().await.shutdown().await?;
        info!("Command channel closed");
        Ok(())
    }

    fn dispatch(&self, chunk: &str) {
        let notifications = {
            let mut state = self.inner.state();
            let outcome = state.demux.feed(chunk);
            if let Some(reply) = outcome.reply {
                match state.exchange.take() {
                    Some(exchange) => {
                        // The waiter may have timed out already.
                        let _ = exchange.reply.send(reply);
                    }
                    None => debug!(reply = %reply, "Reply without a waiting exchange"),
                }
            }
            outcome.notifications
        };

        for notification in notifications {
            match notification {
                Notification::StoredMessage { storage, index } => {
                    info!(storage = %storage, index, "SMS stored notification received");
                    let channel = self.clone();
                    tokio::spawn(async move {
                        match channel.read_message(index).await {
                            Ok(message) => channel.emit(message),
                            Err(e) => error!(index, error = %e, "Failed to read stored message"),
                        }
                    });
                }
                Notification::Delivered { hex, .. } => {
                    if let Some(decoded) = codec::decode(&hex) {
                        info!(from = ?decoded.sender, "Inline SMS decoded");
                        self.emit(SmsMessage::from_decoded(decoded));
                    }
                }
            }
        }
    }

    fn emit(&self, message: SmsMessage) {
        if self.inner.events.send(message).is_err() {
            debug!("Inbound SMS dropped, no subscribers");
        }
    }

    fn mark_closed(&self) {
        self.inner.open.store(false, Ordering::Release);
        self.inner.initialized.store(false, Ordering::Release);
        let mut state = self.inner.state();
        // Dropping the sender wakes the waiter with ChannelClosed.
        state.exchange = None;
        state.demux.abandon_exchange();
    }
}

async fn read_loop<R>(inner: Weak<Inner>, mut reader: ChunkReader<R>, shutdown: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    loop {
        let chunk = tokio::select! {
            _ = shutdown.cancelled() => break,
            chunk = reader.read_chunk() => chunk,
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let channel = CommandChannel { inner };

        match chunk {
            Ok(Some(text)) => {
                debug!(data = %text.trim(), "<<< raw");
                channel.dispatch(&text);
            }
            Ok(None) => {
                warn!("Modem stream closed");
                channel.mark_closed();
                break;
            }
            Err(e) => {
                error!(error = %e, "Modem read failed");
                channel.mark_closed();
                break;
            }
        }
    }
    debug!("Read loop stopped");
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("initialized", &self.is_initialized())
            .field("open", &self.is_open())
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}
