// ABOUTME: Message and job types exchanged between the modem layers and the queue boundary
// ABOUTME: Inbound SMS records serialize to the JSON shape published on the incoming topic

use crate::codec::DecodedPdu;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store status of a message that has not been read yet.
pub const STATUS_REC_UNREAD: &str = "REC UNREAD";
/// Store status of a message that has been read.
pub const STATUS_REC_READ: &str = "REC READ";

/// Inbound SMS as delivered to handlers and published as an event
///
/// Messages from the push path carry no store index; messages read from
/// the SIM store carry the index and status reported by the modem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsMessage {
    /// Sender address, absent when the PDU did not carry a usable one
    pub from: Option<String>,
    /// Decoded message text
    pub text: String,
    /// Receipt time, taken when the message was decoded
    pub received_at: DateTime<Utc>,
    /// Store index on the modem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Store status tag such as "REC UNREAD"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl SmsMessage {
    /// Create a message received now
    pub fn new(from: Option<String>, text: impl Into<String>) -> Self {
        Self {
            from,
            text: text.into(),
            received_at: Utc::now(),
            index: None,
            status: None,
        }
    }

    /// Build a message from a decoded PDU
    pub fn from_decoded(decoded: DecodedPdu) -> Self {
        Self {
            from: decoded.sender,
            text: decoded.text,
            received_at: decoded.received_at,
            index: None,
            status: None,
        }
    }

    /// Set the store index
    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the store status
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Payload of a job on the outgoing queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingJob {
    /// Destination number
    pub to: String,
    /// Message text
    pub text: String,
}

impl OutgoingJob {
    pub fn new(to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            text: text.into(),
        }
    }
}

/// A job handed out by a queue, with its delivery bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    /// Queue-assigned identifier
    pub id: u64,
    pub job: OutgoingJob,
    /// Number of earlier failed attempts
    pub attempts: u32,
}
