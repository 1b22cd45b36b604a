// GSM 03.40 PDU codec - builds SMS-SUBMIT TPDUs and parses SMS-DELIVER/SUBMIT TPDUs
//
// This module keeps the wire format (hex strings as exchanged with the modem
// in PDU mode) apart from the command channel. Outgoing text is split into
// concatenated segments here, and every produced PDU carries the TPDU length
// that AT+CMGS expects.

use crate::datatypes::{
    Address, Alphabet, CONCAT_HEADER_OCTETS, ConcatInfo, decode_scts, format_phone_number, gsm7,
    parse_concat,
};
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, FixedOffset, Utc};
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, warn};

/// Concatenation references one segment count octet can address.
pub const MAX_SEGMENTS: usize = 255;

/// Upper bound on a PDU in octets, service centre prefix included.
pub const MAX_PDU_OCTETS: usize = 176;

/// First octet of an SMS-SUBMIT: MTI=01, relative validity period present.
const SUBMIT_FIRST_OCTET: u8 = 0x11;
/// TP-UDHI flag in the first octet.
const UDHI: u8 = 0x40;
/// Relative validity period of 4 days.
const VALIDITY_PERIOD: u8 = 0xAA;

/// Codec errors with enough context to tell a corrupt encode from bad input
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PduError {
    #[error("Invalid PDU: hex string has odd length ({0})")]
    OddHexLength(usize),

    #[error("Invalid TPDU length: {0}")]
    NonPositiveLength(i64),

    #[error("Invalid destination number: {0:?}")]
    InvalidDestination(String),

    #[error("Invalid hex in PDU: {0}")]
    InvalidHex(String),

    #[error("PDU truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("Unsupported message type in first octet {0:#04x}")]
    UnsupportedMessageType(u8),

    #[error("Message needs {0} segments, at most 255 are addressable")]
    TooManySegments(usize),
}

/// One encoded SMS-SUBMIT ready for `AT+CMGS=<tpdu_length>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitPdu {
    /// Full PDU as uppercase hex, SMSC prefix included.
    pub hex: String,
    /// Octet count excluding the SMSC prefix.
    pub tpdu_length: usize,
    pub concat: Option<ConcatInfo>,
}

/// TPDU types the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Deliver,
    Submit,
}

/// Result of decoding an inbound (or looped-back outbound) PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPdu {
    pub kind: MessageKind,
    /// Originating address of an SMS-DELIVER, absent when empty.
    pub sender: Option<String>,
    /// Destination address of an SMS-SUBMIT.
    pub recipient: Option<String>,
    pub text: String,
    pub alphabet: Alphabet,
    /// Wall-clock time at decode.
    pub received_at: DateTime<Utc>,
    /// TP-SCTS as reported by the network, when present and valid.
    pub service_centre_time: Option<DateTime<FixedOffset>>,
    pub concat: Option<ConcatInfo>,
}

/// Decode a single octet, naming the field on failure
pub fn decode_u8(buf: &mut Cursor<&[u8]>, field: &'static str) -> Result<u8, PduError> {
    if buf.remaining() < 1 {
        return Err(PduError::Truncated { field });
    }
    Ok(buf.get_u8())
}

fn skip(buf: &mut Cursor<&[u8]>, octets: usize, field: &'static str) -> Result<(), PduError> {
    if buf.remaining() < octets {
        return Err(PduError::Truncated { field });
    }
    buf.advance(octets);
    Ok(())
}

/// Computes the `AT+CMGS` length argument of a hex PDU: total octets minus
/// the SMSC length octet and the SMSC address it announces.
///
/// Fails on odd-length hex and on a length that is not positive, both of
/// which mean the PDU is corrupt and must not be transmitted.
pub fn tpdu_length(hex: &str) -> Result<usize, PduError> {
    if hex.len() % 2 != 0 {
        return Err(PduError::OddHexLength(hex.len()));
    }
    let smsc_len = hex
        .get(..2)
        .and_then(|prefix| u8::from_str_radix(prefix, 16).ok())
        .ok_or_else(|| PduError::InvalidHex(hex.to_string()))?;

    let length = (hex.len() / 2) as i64 - (i64::from(smsc_len) + 1);
    if length <= 0 {
        return Err(PduError::NonPositiveLength(length));
    }
    Ok(length as usize)
}

/// Splits text into per-segment unit lists for the given alphabet.
///
/// GSM 7-bit units are septets and a split never falls between an escape
/// septet and its code. UCS-2 units are UTF-16 code units and a split never
/// falls inside a surrogate pair.
fn segment_units(text: &str, alphabet: Alphabet) -> Vec<Vec<u16>> {
    let units: Vec<u16> = match alphabet {
        Alphabet::Gsm7 => gsm7::encode_septets(text)
            .unwrap_or_default()
            .into_iter()
            .map(u16::from)
            .collect(),
        Alphabet::EightBit => text.bytes().map(u16::from).collect(),
        Alphabet::Ucs2 => text.encode_utf16().collect(),
    };

    if units.len() <= alphabet.single_segment_capacity() {
        return vec![units];
    }

    let capacity = alphabet.concatenated_segment_capacity();
    let mut segments = Vec::with_capacity(units.len().div_ceil(capacity));
    let mut rest = units.as_slice();
    while !rest.is_empty() {
        let mut take = capacity.min(rest.len());
        if take < rest.len() {
            let last = rest[take - 1];
            let splits_pair = match alphabet {
                Alphabet::Gsm7 => last == u16::from(gsm7::ESCAPE),
                Alphabet::Ucs2 => (0xD800..=0xDBFF).contains(&last),
                Alphabet::EightBit => false,
            };
            if splits_pair {
                take -= 1;
            }
        }
        let (head, tail) = rest.split_at(take);
        segments.push(head.to_vec());
        rest = tail;
    }
    segments
}

fn encode_segment(
    address: &Address,
    alphabet: Alphabet,
    units: &[u16],
    concat: Option<ConcatInfo>,
) -> Result<SubmitPdu, PduError> {
    let mut buf = BytesMut::with_capacity(MAX_PDU_OCTETS);

    // Empty SMSC field: the modem uses the SIM's service centre.
    buf.put_u8(0x00);
    buf.put_u8(if concat.is_some() {
        SUBMIT_FIRST_OCTET | UDHI
    } else {
        SUBMIT_FIRST_OCTET
    });
    buf.put_u8(0x00);
    address.encode(&mut buf)?;
    buf.put_u8(0x00);
    buf.put_u8(alphabet.dcs());
    buf.put_u8(VALIDITY_PERIOD);

    let header_octets = if concat.is_some() { CONCAT_HEADER_OCTETS } else { 0 };
    let mut user_data = BytesMut::with_capacity(140);
    if let Some(info) = &concat {
        info.encode(&mut user_data);
    }

    let udl = match alphabet {
        Alphabet::Gsm7 => {
            let septets: Vec<u8> = units.iter().map(|&u| u as u8).collect();
            let fill = if header_octets > 0 {
                gsm7::fill_bits_after_header(header_octets)
            } else {
                0
            };
            user_data.put_slice(&gsm7::pack(&septets, fill));
            (header_octets * 8 + fill) / 7 + septets.len()
        }
        Alphabet::EightBit => {
            for &unit in units {
                user_data.put_u8(unit as u8);
            }
            user_data.len()
        }
        Alphabet::Ucs2 => {
            for &unit in units {
                user_data.put_u16(unit);
            }
            user_data.len()
        }
    };

    buf.put_u8(udl as u8);
    buf.put_slice(&user_data);

    let hex = hex::encode_upper(&buf);
    let tpdu_length = tpdu_length(&hex)?;
    Ok(SubmitPdu {
        hex,
        tpdu_length,
        concat,
    })
}

/// Encodes `text` for `destination` into one or more SMS-SUBMIT PDUs.
///
/// Multi-segment messages share a freshly generated reference.
pub fn encode(destination: &str, text: &str) -> Result<Vec<SubmitPdu>, PduError> {
    encode_with_reference(destination, text, rand::random::<u8>())
}

/// Same as [`encode`] with a caller-chosen concatenation reference.
pub fn encode_with_reference(
    destination: &str,
    text: &str,
    reference: u8,
) -> Result<Vec<SubmitPdu>, PduError> {
    let number = format_phone_number(destination);
    let address = Address::from_number(&number)?;
    let alphabet = Alphabet::for_text(text);
    let segments = segment_units(text, alphabet);

    if segments.len() > MAX_SEGMENTS {
        return Err(PduError::TooManySegments(segments.len()));
    }
    let total = segments.len() as u8;

    let pdus = segments
        .iter()
        .enumerate()
        .map(|(i, units)| {
            let concat = (total > 1).then(|| ConcatInfo {
                reference: u16::from(reference),
                total,
                part: i as u8 + 1,
            });
            encode_segment(&address, alphabet, units, concat)
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        destination = %number,
        alphabet = %alphabet,
        segments = pdus.len(),
        "Encoded SMS-SUBMIT"
    );
    Ok(pdus)
}

/// Parses a hex PDU (SMSC prefix included) into its fields.
pub fn parse_pdu(hex: &str) -> Result<DecodedPdu, PduError> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return Err(PduError::OddHexLength(hex.len()));
    }
    let raw = hex::decode(hex).map_err(|e| PduError::InvalidHex(e.to_string()))?;
    let mut buf = Cursor::new(raw.as_slice());

    let smsc_len = decode_u8(&mut buf, "SMSC length")?;
    skip(&mut buf, usize::from(smsc_len), "SMSC address")?;

    let first_octet = decode_u8(&mut buf, "first octet")?;
    let kind = match first_octet & 0x03 {
        0b00 => MessageKind::Deliver,
        0b01 => MessageKind::Submit,
        _ => return Err(PduError::UnsupportedMessageType(first_octet)),
    };
    let has_header = first_octet & UDHI != 0;

    let ((address, dcs), service_centre_time) = match kind {
        MessageKind::Deliver => {
            let address = Address::decode(&mut buf)?;
            decode_u8(&mut buf, "protocol identifier")?;
            let dcs = decode_u8(&mut buf, "data coding scheme")?;
            let scts = decode_scts(&mut buf)?;
            ((address, dcs), scts)
        }
        MessageKind::Submit => {
            decode_u8(&mut buf, "message reference")?;
            let address = Address::decode(&mut buf)?;
            decode_u8(&mut buf, "protocol identifier")?;
            let dcs = decode_u8(&mut buf, "data coding scheme")?;
            match (first_octet >> 3) & 0b11 {
                0b00 => {}
                0b10 => skip(&mut buf, 1, "validity period")?,
                _ => skip(&mut buf, 7, "validity period")?,
            }
            ((address, dcs), None)
        }
    };
    let alphabet = Alphabet::from_dcs(dcs);

    let udl = usize::from(decode_u8(&mut buf, "user data length")?);
    let ud_octets = match alphabet {
        Alphabet::Gsm7 => (udl * 7).div_ceil(8),
        _ => udl,
    };
    if buf.remaining() < ud_octets {
        return Err(PduError::Truncated { field: "user data" });
    }
    // Trailing octets past the declared user data are ignored.
    let user_data = &buf.chunk()[..ud_octets];

    let (header_octets, concat) = if has_header {
        let udhl = usize::from(*user_data.first().ok_or(PduError::Truncated {
            field: "user data header",
        })?);
        let header = user_data.get(1..=udhl).ok_or(PduError::Truncated {
            field: "user data header",
        })?;
        (udhl + 1, parse_concat(header))
    } else {
        (0, None)
    };

    let text = match alphabet {
        Alphabet::Gsm7 => {
            let fill = if header_octets > 0 {
                gsm7::fill_bits_after_header(header_octets)
            } else {
                0
            };
            let header_bits = header_octets * 8 + fill;
            let count = udl.saturating_sub(header_bits / 7);
            gsm7::decode_septets(&gsm7::unpack(user_data, header_bits, count))
        }
        Alphabet::EightBit => user_data[header_octets..]
            .iter()
            .map(|&b| char::from(b))
            .collect(),
        Alphabet::Ucs2 => {
            let units: Vec<u16> = user_data[header_octets..]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
    };

    let value = (!address.value.is_empty()).then(|| address.value.clone());
    let (sender, recipient) = match kind {
        MessageKind::Deliver => (value, None),
        MessageKind::Submit => (None, value),
    };

    Ok(DecodedPdu {
        kind,
        sender,
        recipient,
        text,
        alphabet,
        received_at: Utc::now(),
        service_centre_time,
        concat,
    })
}

/// Decodes a hex PDU, logging and swallowing any failure.
///
/// Callers treat `None` as a dropped message.
pub fn decode(hex: &str) -> Option<DecodedPdu> {
    match parse_pdu(hex) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(pdu = %hex, error = %e, "Failed to decode PDU");
            None
        }
    }
}

/// Builds an SMS-DELIVER PDU as a modem would report it.
#[cfg(test)]
pub(crate) fn build_deliver(sender: &str, text: &str) -> String {
    let mut buf = BytesMut::new();
    buf.put_slice(&[0x07, 0x91, 0x72, 0x83, 0x01, 0x00, 0x10, 0xF5]);
    buf.put_u8(0x04);
    Address::from_number(sender)
        .and_then(|address| address.encode(&mut buf))
        .expect("test sender must be numeric");
    buf.put_u8(0x00);
    let alphabet = Alphabet::for_text(text);
    buf.put_u8(alphabet.dcs());
    buf.put_slice(&[0x42, 0x01, 0x71, 0x21, 0x43, 0x65, 0x00]);
    match alphabet {
        Alphabet::Gsm7 => {
            let septets = gsm7::encode_septets(text).expect("GSM text");
            buf.put_u8(septets.len() as u8);
            buf.put_slice(&gsm7::pack(&septets, 0));
        }
        _ => {
            let units: Vec<u16> = text.encode_utf16().collect();
            buf.put_u8((units.len() * 2) as u8);
            for unit in units {
                buf.put_u16(unit);
            }
        }
    }
    hex::encode_upper(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::TypeOfNumber;
    use chrono::Timelike;

    const DELIVER_PDU: &str =
        "07917283010010F5040BC87238880900F10000993092516195800AE8329BFD4697D9EC37";

    #[test]
    fn encode_single_gsm_segment() {
        let pdus = encode("+15550001", "hello").unwrap();
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].hex, "0011000891515500100000AA05E8329BFD06");
        assert_eq!(pdus[0].tpdu_length, 17);
        assert!(pdus[0].concat.is_none());
    }

    #[test]
    fn encode_normalizes_destination() {
        let pdus = encode("0081234567", "hi").unwrap();
        let decoded = parse_pdu(&pdus[0].hex).unwrap();
        assert_eq!(decoded.recipient.as_deref(), Some("+81234567"));
    }

    #[test]
    fn encode_rejects_bad_destination() {
        assert!(matches!(
            encode("not a number", "hi"),
            Err(PduError::InvalidDestination(_))
        ));
    }

    #[test]
    fn encode_rejects_overlong_destination() {
        assert!(matches!(
            encode(&format!("+{}", "1".repeat(21)), "hi"),
            Err(PduError::InvalidDestination(_))
        ));
        assert!(encode(&format!("+{}", "1".repeat(20)), "hi").is_ok());
    }

    #[test]
    fn tpdu_length_validation() {
        assert_eq!(tpdu_length("0011000891515500100000AA05E8329BFD06"), Ok(17));
        assert_eq!(tpdu_length("001"), Err(PduError::OddHexLength(3)));
        assert_eq!(tpdu_length("00"), Err(PduError::NonPositiveLength(0)));
        // SMSC prefix claims more octets than the PDU holds
        assert_eq!(tpdu_length("0791FF"), Err(PduError::NonPositiveLength(-5)));
        assert!(matches!(tpdu_length("ZZ00"), Err(PduError::InvalidHex(_))));
    }

    #[test]
    fn decode_deliver_pdu() {
        let decoded = decode(DELIVER_PDU).unwrap();
        assert_eq!(decoded.kind, MessageKind::Deliver);
        assert_eq!(decoded.sender.as_deref(), Some("27838890001"));
        assert_eq!(decoded.text, "hellohello");
        assert_eq!(decoded.alphabet, Alphabet::Gsm7);

        let scts = decoded.service_centre_time.unwrap();
        assert_eq!((scts.hour(), scts.minute(), scts.second()), (15, 16, 59));
        assert_eq!(scts.offset().local_minus_utc(), 7200);
    }

    #[test]
    fn decode_tolerates_trailing_data() {
        let padded = format!("{DELIVER_PDU}0000");
        let decoded = decode(&padded).unwrap();
        assert_eq!(decoded.text, "hellohello");
    }

    #[test]
    fn decode_failure_is_none() {
        assert!(decode("07917283010010F5040BC872").is_none());
        assert!(decode("XYZ").is_none());
        assert!(decode("07917283010010F5").is_none());
    }

    #[test]
    fn decode_international_sender_gets_plus() {
        let pdu = build_deliver("+447911123456", "Hi there");
        let decoded = parse_pdu(&pdu).unwrap();
        assert_eq!(decoded.sender.as_deref(), Some("+447911123456"));
        assert_eq!(decoded.text, "Hi there");
    }

    #[test]
    fn long_gsm_text_is_concatenated() {
        let text = "a".repeat(161);
        let pdus = encode_with_reference("+15550001", &text, 0x42).unwrap();
        assert_eq!(pdus.len(), 2);

        let mut recovered = String::new();
        for (i, pdu) in pdus.iter().enumerate() {
            let info = pdu.concat.unwrap();
            assert_eq!(info.reference, 0x42);
            assert_eq!(info.total, 2);
            assert_eq!(info.part as usize, i + 1);
            assert_eq!(tpdu_length(&pdu.hex).unwrap(), pdu.tpdu_length);

            let decoded = parse_pdu(&pdu.hex).unwrap();
            assert_eq!(decoded.concat, Some(info));
            recovered.push_str(&decoded.text);
        }
        assert_eq!(recovered, text);
        assert_eq!(parse_pdu(&pdus[0].hex).unwrap().text.len(), 153);
    }

    #[test]
    fn exactly_one_segment_is_not_concatenated() {
        let pdus = encode("+15550001", &"x".repeat(160)).unwrap();
        assert_eq!(pdus.len(), 1);
        assert_eq!(parse_pdu(&pdus[0].hex).unwrap().text.len(), 160);
    }

    #[test]
    fn ucs2_round_trip() {
        let text = "Привет, мир";
        let pdus = encode("+79161234567", text).unwrap();
        assert_eq!(pdus.len(), 1);
        let decoded = parse_pdu(&pdus[0].hex).unwrap();
        assert_eq!(decoded.alphabet, Alphabet::Ucs2);
        assert_eq!(decoded.text, text);
    }

    #[test]
    fn long_ucs2_text_keeps_surrogate_pairs_whole() {
        // 66 BMP chars then an emoji straddling the 67-unit boundary
        let text = format!("{}😀{}", "ж".repeat(66), "ж".repeat(10));
        let pdus = encode_with_reference("+15550001", &text, 7).unwrap();
        assert_eq!(pdus.len(), 2);

        let first = parse_pdu(&pdus[0].hex).unwrap().text;
        let second = parse_pdu(&pdus[1].hex).unwrap().text;
        assert_eq!(first.chars().count(), 66);
        assert!(second.starts_with('😀'));
        assert_eq!(format!("{first}{second}"), text);
    }

    #[test]
    fn long_gsm_text_keeps_escape_pairs_whole() {
        // 152 plain septets then '€' (escape + code) across the boundary
        let text = format!("{}€{}", "b".repeat(152), "c".repeat(20));
        let pdus = encode_with_reference("+15550001", &text, 9).unwrap();
        assert_eq!(pdus.len(), 2);

        let first = parse_pdu(&pdus[0].hex).unwrap().text;
        let second = parse_pdu(&pdus[1].hex).unwrap().text;
        assert_eq!(first, "b".repeat(152));
        assert!(second.starts_with('€'));
    }

    #[test]
    fn submit_decode_exposes_recipient_type() {
        let pdus = encode("15550001", "local").unwrap();
        let raw = hex::decode(&pdus[0].hex).unwrap();
        // SMSC len, first octet, MR, address length, type octet
        assert_eq!(TypeOfNumber::from_type_octet(raw[4]), TypeOfNumber::Unknown);
        let decoded = parse_pdu(&pdus[0].hex).unwrap();
        assert_eq!(decoded.kind, MessageKind::Submit);
        assert_eq!(decoded.recipient.as_deref(), Some("15550001"));
        assert_eq!(decoded.text, "local");
    }

    #[test]
    fn rejects_status_report_type() {
        assert_eq!(
            parse_pdu("0002"),
            Err(PduError::UnsupportedMessageType(0x02))
        );
    }
}
