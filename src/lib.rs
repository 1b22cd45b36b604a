pub mod channel;
pub mod codec;
pub mod config;
pub mod connection;
pub mod datatypes;
pub mod error;
pub mod handler;
pub mod poller;
pub mod queue;
pub mod session;
pub mod traits;
pub mod types;
pub mod worker;


// Re-export the codec entry points
pub use codec::{DecodedPdu, MessageKind, PduError, SubmitPdu};

// Re-export the modem API for easy access
pub use channel::CommandChannel;
pub use config::{Config, HandlerConfig, PollerConfig, SerialConfig};
pub use error::{ModemError, ModemResult};
pub use handler::SmsHandler;
pub use poller::{InboxPoller, PollReport};
pub use session::ModemSession;
pub use traits::{EventPublisher, JobQueue, MessageHandler, handler_fn};
pub use types::{OutgoingJob, QueuedJob, SmsMessage};
pub use worker::{EventRelay, ModemWorker};

/// Error type used by the binaries and demos.
///
/// Library operations return [`ModemError`]; this boxed form only exists so
/// `main` functions can mix it with argument and setup errors.
///
/// # Examples
///
/// ## Sending one SMS
///
/// ```rust,no_run
/// use serialsms::{ModemSession, SerialConfig};
///
/// #[tokio::main]
/// async fn main() -> serialsms::Result<()> {
///     // Open the port, wait for the modem and run the setup commands
///     let session = ModemSession::open(&SerialConfig::new("/dev/ttyUSB2")).await?;
///
///     let segments = session.channel().send_sms("+15550001", "Hello, World!").await?;
///     println!("Sent in {} segment(s)", segments);
///
///     session.close().await?;
///     Ok(())
/// }
/// ```
///
/// ## Decoding a received PDU
///
/// ```rust
/// let pdu = serialsms::codec::decode(
///     "07917283010010F5040BC87238880900F10000993092516195800AE8329BFD4697D9EC37",
/// )
/// .unwrap();
/// assert_eq!(pdu.sender.as_deref(), Some("27838890001"));
/// assert_eq!(pdu.text, "hellohello");
/// ```
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for the binaries and demos.
pub type Result<T> = std::result::Result<T, Error>;
