// ABOUTME: Modem error types shared by the command channel, poller, handler and worker
// ABOUTME: Wraps codec, serial, I/O and queue failures with automatic conversions

use crate::codec::PduError;
use std::io;
use thiserror::Error;

/// Error type for every runtime modem operation
///
/// Codec failures keep their own [`PduError`] so callers can tell a corrupt
/// encode apart from a transport problem.
#[derive(Debug, Error)]
pub enum ModemError {
    /// PDU construction failed before anything was transmitted
    #[error("Encoding error: {0}")]
    Encoding(#[from] PduError),

    /// A command was issued while another exchange was outstanding
    #[error("Modem is busy")]
    ChannelBusy,

    /// No matching terminator arrived before the deadline
    #[error("Timeout waiting for response to {command}")]
    Timeout { command: String },

    /// A setup command failed during the initialization sequence
    #[error("Initialization failed at {command}: {source}")]
    Initialization {
        command: String,
        #[source]
        source: Box<ModemError>,
    },

    /// Malformed listing or response text
    #[error("Parse error: {0}")]
    Parse(String),

    /// I/O error on the serial stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure opening or configuring the serial port
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// The reader task has stopped or the channel was closed
    #[error("Command channel closed")]
    ChannelClosed,

    /// SMS sending requested before initialization completed
    #[error("Modem not initialized")]
    NotInitialized,

    /// Job queue or event bus failure
    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for modem operations
pub type ModemResult<T> = Result<T, ModemError>;

#[cfg(feature = "redis")]
impl From<redis::RedisError> for ModemError {
    fn from(err: redis::RedisError) -> Self {
        ModemError::Queue(err.to_string())
    }
}

impl ModemError {
    /// True for failures a later attempt may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ModemError::ChannelBusy | ModemError::Timeout { .. } | ModemError::Queue(_)
        )
    }
}
