// ABOUTME: Demultiplexer for the shared modem read stream: reply matching plus notification parsing
// ABOUTME: Reassembles inline +CMT deliveries whose hex payload spans several reads

use crate::codec::MAX_PDU_OCTETS;
use tracing::{debug, info, warn};

/// Prefix of a store-index notification: `+CMTI: "<storage>",<index>`.
pub const CMTI_PREFIX: &str = "+CMTI:";
/// Prefix of an inline delivery notification: `+CMT: [<alpha>],<length>`.
pub const CMT_PREFIX: &str = "+CMT:";

/// Reply axis of the channel state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReplyState {
    #[default]
    Idle,
    AwaitingReply {
        expected: String,
    },
}

/// Inline delivery whose payload is still arriving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInboundPdu {
    /// TPDU length announced by the notification, in octets.
    pub declared_octets: usize,
    /// Hex digits received so far, whitespace removed.
    pub hex: String,
}

impl PendingInboundPdu {
    fn is_complete(&self) -> bool {
        self.hex.len() >= self.declared_octets * 2
    }
}

/// Unsolicited events found in a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A message was stored and must be read by index.
    StoredMessage { storage: String, index: u32 },
    /// An inline delivery is complete. `hex` is everything accumulated,
    /// which may run past the declared length.
    Delivered { hex: String, declared_octets: usize },
}

/// What one chunk produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Trimmed buffer content when the outstanding exchange matched.
    pub reply: Option<String>,
    pub notifications: Vec<Notification>,
}

/// State machine over the shared read stream
///
/// Every chunk goes through the reply matcher first and then, regardless
/// of its result, through the notification matcher. The two axes are
/// independent: a chunk can finish a reply and start an inline delivery.
#[derive(Debug, Default)]
pub struct Demux {
    buffer: String,
    reply: ReplyState,
    pending: Option<PendingInboundPdu>,
}

impl Demux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.reply == ReplyState::Idle
    }

    pub fn reply_state(&self) -> &ReplyState {
        &self.reply
    }

    pub fn pending_pdu(&self) -> Option<&PendingInboundPdu> {
        self.pending.as_ref()
    }

    /// Accumulated reply text not yet consumed by an exchange.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Starts waiting for `expected`. Stale bytes from before the command
    /// are dropped so they cannot satisfy it.
    pub fn begin_exchange(&mut self, expected: &str) {
        self.buffer.clear();
        self.reply = ReplyState::AwaitingReply {
            expected: expected.to_string(),
        };
    }

    /// Gives up on the outstanding exchange (timeout or write failure) and
    /// discards whatever partial reply was buffered.
    pub fn abandon_exchange(&mut self) {
        if !self.buffer.is_empty() {
            debug!(discarded = %self.buffer.trim(), "Clearing read buffer");
        }
        self.buffer.clear();
        self.reply = ReplyState::Idle;
    }

    /// Feeds one chunk read from the modem. Reply text is only buffered
    /// while an exchange is outstanding.
    pub fn feed(&mut self, chunk: &str) -> ChunkOutcome {
        if !self.is_idle() {
            self.buffer.push_str(chunk);
        }

        let mut outcome = ChunkOutcome {
            reply: self.match_reply(),
            notifications: Vec::new(),
        };

        if chunk.contains(CMTI_PREFIX) {
            outcome.notifications.extend(parse_cmti(chunk));
        } else if chunk.contains(CMT_PREFIX) {
            self.start_inline_delivery(chunk, &mut outcome.notifications);
        } else if self.pending.is_some() && is_hex_data(chunk) {
            self.continue_inline_delivery(chunk, &mut outcome.notifications);
        }

        outcome
    }

    fn match_reply(&mut self) -> Option<String> {
        let ReplyState::AwaitingReply { expected } = &self.reply else {
            return None;
        };
        if !self.buffer.contains(expected.as_str()) {
            return None;
        }
        let reply = self.buffer.trim().to_string();
        self.buffer.clear();
        self.reply = ReplyState::Idle;
        Some(reply)
    }

    fn start_inline_delivery(&mut self, chunk: &str, out: &mut Vec<Notification>) {
        let Some((declared_octets, payload)) = parse_cmt(chunk) else {
            debug!(chunk = %chunk.trim(), "Ignoring +CMT without a PDU length");
            return;
        };
        if declared_octets == 0 || declared_octets > MAX_PDU_OCTETS {
            warn!(length = declared_octets, "Ignoring +CMT with an impossible PDU length");
            return;
        }
        if let Some(previous) = self.pending.take() {
            warn!(
                received = previous.hex.len(),
                expected = previous.declared_octets * 2,
                "Discarding incomplete inline delivery"
            );
        }

        info!(length = declared_octets, "Inline SMS notification received");
        self.pending = Some(PendingInboundPdu {
            declared_octets,
            hex: payload,
        });
        self.complete_if_ready(out);
    }

    fn continue_inline_delivery(&mut self, chunk: &str, out: &mut Vec<Notification>) {
        if let Some(pending) = self.pending.as_mut() {
            pending
                .hex
                .extend(chunk.chars().filter(|c| !c.is_whitespace()));
            debug!(
                received = pending.hex.len(),
                expected = pending.declared_octets * 2,
                "Accumulated inline PDU data"
            );
        }
        self.complete_if_ready(out);
    }

    fn complete_if_ready(&mut self, out: &mut Vec<Notification>) {
        if !self.pending.as_ref().is_some_and(PendingInboundPdu::is_complete) {
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.hex.len() > pending.declared_octets * 2 {
            debug!(
                received = pending.hex.len(),
                expected = pending.declared_octets * 2,
                "Inline PDU over-delivered, decoding full buffer"
            );
        }
        out.push(Notification::Delivered {
            hex: pending.hex,
            declared_octets: pending.declared_octets,
        });
    }
}

/// True when the chunk holds hex digits and nothing else but whitespace.
pub fn is_hex_data(chunk: &str) -> bool {
    let trimmed = chunk.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c.is_whitespace())
}

/// Extracts every `+CMTI` notification in a chunk.
pub fn parse_cmti(chunk: &str) -> Vec<Notification> {
    chunk
        .lines()
        .filter_map(|line| {
            let rest = line.split_once(CMTI_PREFIX)?.1;
            let (storage, index) = rest.split_once(',')?;
            let digits: String = index
                .trim()
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            Some(Notification::StoredMessage {
                storage: storage.trim().trim_matches('"').to_string(),
                index: digits.parse().ok()?,
            })
        })
        .collect()
}

/// Parses the declared length of a `+CMT:` line and any hex payload that
/// follows it in the same chunk.
pub fn parse_cmt(chunk: &str) -> Option<(usize, String)> {
    let (_, rest) = chunk.split_once(CMT_PREFIX)?;
    let (header, body) = match rest.split_once('\n') {
        Some((header, body)) => (header, body),
        None => (rest, ""),
    };
    let (_, length) = header.rsplit_once(',')?;
    let declared = length.trim().parse().ok()?;

    let mut payload = String::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.chars().all(|c| c.is_ascii_hexdigit()) {
            break;
        }
        payload.push_str(line);
    }
    Some((declared, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDU: &str = "07917283010010F5040BC87238880900F10000993092516195800AE8329BFD4697D9EC37";

    #[test]
    fn reply_resolves_on_expected_text() {
        let mut demux = Demux::new();
        demux.begin_exchange("OK");

        assert_eq!(demux.feed("AT\r\r\n").reply, None);
        assert!(!demux.is_idle());

        let outcome = demux.feed("OK\r\n");
        assert_eq!(outcome.reply.as_deref(), Some("AT\r\r\nOK"));
        assert!(demux.is_idle());
        assert!(demux.buffer().is_empty());
    }

    #[test]
    fn prompt_is_matched() {
        let mut demux = Demux::new();
        demux.begin_exchange(">");
        assert_eq!(demux.feed("\r\n> ").reply.as_deref(), Some(">"));
    }

    #[test]
    fn new_exchange_drops_stale_bytes() {
        let mut demux = Demux::new();
        demux.begin_exchange(">");
        demux.feed("OK\r\n");
        demux.begin_exchange("OK");
        assert!(demux.buffer().is_empty());
        assert_eq!(demux.feed("\r\n").reply, None);
    }

    #[test]
    fn abandon_clears_buffer_and_returns_to_idle() {
        let mut demux = Demux::new();
        demux.begin_exchange("OK");
        demux.feed("partial");
        demux.abandon_exchange();
        assert!(demux.is_idle());
        assert!(demux.buffer().is_empty());
    }

    #[test]
    fn cmti_notification_is_parsed() {
        let mut demux = Demux::new();
        let outcome = demux.feed("\r\n+CMTI: \"SM\",4\r\n");
        assert_eq!(
            outcome.notifications,
            vec![Notification::StoredMessage {
                storage: "SM".to_string(),
                index: 4
            }]
        );
    }

    #[test]
    fn reply_and_notification_in_one_chunk() {
        let mut demux = Demux::new();
        demux.begin_exchange("OK");
        let outcome = demux.feed("OK\r\n\r\n+CMTI: \"ME\",12\r\n");
        assert!(outcome.reply.is_some());
        assert_eq!(outcome.notifications.len(), 1);
    }

    #[test]
    fn inline_delivery_in_one_chunk() {
        let mut demux = Demux::new();
        let outcome = demux.feed(&format!("\r\n+CMT: ,28\r\n{PDU}\r\n"));
        assert_eq!(
            outcome.notifications,
            vec![Notification::Delivered {
                hex: PDU.to_string(),
                declared_octets: 28
            }]
        );
        assert!(demux.pending_pdu().is_none());
    }

    #[test]
    fn inline_delivery_across_chunks_completes_once() {
        let mut demux = Demux::new();
        let (first, rest) = PDU.split_at(20);
        let (second, third) = rest.split_at(30);

        let outcome = demux.feed(&format!("+CMT: ,28\r\n{first}"));
        assert!(outcome.notifications.is_empty());
        assert_eq!(demux.pending_pdu().unwrap().hex, first);

        assert!(demux.feed(second).notifications.is_empty());

        let outcome = demux.feed(&format!("{third}\r\n"));
        assert_eq!(outcome.notifications.len(), 1);
        assert!(demux.pending_pdu().is_none());

        // Later hex is not treated as continuation.
        assert!(demux.feed("ABCDEF").notifications.is_empty());
    }

    #[test]
    fn over_delivered_payload_is_kept_whole() {
        let mut demux = Demux::new();
        demux.feed("+CMT: ,4\r\n0011");
        let outcome = demux.feed("223344556677");
        assert_eq!(
            outcome.notifications,
            vec![Notification::Delivered {
                hex: "0011223344556677".to_string(),
                declared_octets: 4
            }]
        );
    }

    #[test]
    fn alpha_field_and_zero_length() {
        assert_eq!(
            parse_cmt("+CMT: \"Bank\",23\r\n"),
            Some((23, String::new()))
        );
        let mut demux = Demux::new();
        assert!(demux.feed("+CMT: ,0\r\n").notifications.is_empty());
        assert!(demux.pending_pdu().is_none());
    }

    #[test]
    fn oversized_declared_length_is_ignored() {
        let mut demux = Demux::new();
        let outcome = demux.feed("\r\n+CMT: ,18446744073709551615\r\n0011\r\n");
        assert!(outcome.notifications.is_empty());
        assert!(demux.pending_pdu().is_none());

        demux.feed(&format!("+CMT: ,{}\r\n", MAX_PDU_OCTETS + 1));
        assert!(demux.pending_pdu().is_none());

        demux.feed(&format!("+CMT: ,{MAX_PDU_OCTETS}\r\n"));
        assert_eq!(demux.pending_pdu().unwrap().declared_octets, MAX_PDU_OCTETS);
    }

    #[test]
    fn idle_traffic_is_not_buffered() {
        let mut demux = Demux::new();
        demux.feed("\r\n+CMTI: \"SM\",4\r\n");
        demux.feed(&format!("\r\n+CMT: ,28\r\n{PDU}\r\n"));
        demux.feed("RING\r\n");
        assert!(demux.buffer().is_empty());

        demux.begin_exchange("OK");
        demux.feed("\r\n+CSQ: 20,99\r\n");
        assert_eq!(demux.buffer(), "\r\n+CSQ: 20,99\r\n");
    }

    #[test]
    fn non_hex_chunk_is_not_continuation() {
        let mut demux = Demux::new();
        demux.feed("+CMT: ,28\r\n");
        demux.feed("RING\r\n");
        assert_eq!(demux.pending_pdu().unwrap().hex, "");
        assert!(!is_hex_data("  \r\n"));
        assert!(is_hex_data("0A1b\r\n"));
    }

    #[test]
    fn continuation_also_lands_in_reply_buffer() {
        let mut demux = Demux::new();
        demux.feed("+CMT: ,2\r\n");
        demux.begin_exchange("OK");
        let outcome = demux.feed("0011\r\n");
        assert_eq!(outcome.notifications.len(), 1);
        assert_eq!(outcome.reply, None);
        assert_eq!(demux.buffer(), "0011\r\n");
    }
}
