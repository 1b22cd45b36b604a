// ABOUTME: Parsers for +CMGR (read by index) and +CMGL (list) responses in PDU and text mode
// ABOUTME: Each listed record parses independently so one bad entry cannot sink a batch

use crate::codec;
use crate::error::{ModemError, ModemResult};
use crate::types::SmsMessage;

pub const CMGR_PREFIX: &str = "+CMGR:";
pub const CMGL_PREFIX: &str = "+CMGL:";

/// Maps a PDU-mode `<stat>` code to its text-mode name.
pub fn status_name(code: u8) -> Option<&'static str> {
    match code {
        0 => Some("REC UNREAD"),
        1 => Some("REC READ"),
        2 => Some("STO UNSENT"),
        3 => Some("STO SENT"),
        4 => Some("ALL"),
        _ => None,
    }
}

/// Splits a header on commas outside double quotes, stripping the quotes.
fn split_fields(header: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in header.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Builds one message from a record header (the fields after the
/// `+CMGR:`/`+CMGL:` prefix, index already removed) and its body line.
fn parse_record(index: u32, fields: &[String], body: Option<&str>) -> ModemResult<SmsMessage> {
    let stat = fields
        .first()
        .ok_or_else(|| ModemError::Parse(format!("empty header for message {index}")))?;
    let body = body
        .map(str::trim)
        .ok_or_else(|| ModemError::Parse(format!("missing body for message {index}")))?;

    if let Ok(code) = stat.parse::<u8>() {
        let decoded = codec::decode(body).ok_or_else(|| {
            ModemError::Parse(format!("undecodable PDU for message {index}"))
        })?;
        let mut message = SmsMessage::from_decoded(decoded).with_index(index);
        if let Some(status) = status_name(code) {
            message = message.with_status(status);
        }
        return Ok(message);
    }

    let sender = fields.get(1).filter(|s| !s.is_empty());
    match sender {
        Some(sender) if !body.is_empty() => Ok(SmsMessage::new(Some(sender.clone()), body)
            .with_index(index)
            .with_status(stat.clone())),
        _ => Err(ModemError::Parse(format!(
            "text-mode message {index} lacks sender or text"
        ))),
    }
}

/// Parses the response to `AT+CMGR=<index>`.
///
/// PDU mode: `+CMGR: <stat>,[<alpha>],<length>` then the hex PDU.
/// Text mode: `+CMGR: "<stat>","<oa>",[<alpha>],<scts>` then the text.
pub fn parse_read_response(response: &str, index: u32) -> ModemResult<SmsMessage> {
    let mut lines = response.lines().map(str::trim_end);
    while let Some(line) = lines.next() {
        let Some(header) = line.trim_start().strip_prefix(CMGR_PREFIX) else {
            continue;
        };
        let fields = split_fields(header);
        let body = lines.find(|l| !l.trim().is_empty());
        return parse_record(index, &fields, body);
    }
    Err(ModemError::Parse(format!("no {CMGR_PREFIX} record for index {index}")))
}

/// Parses the response to `AT+CMGL=<stat>` into one result per record.
pub fn parse_listing(response: &str) -> Vec<ModemResult<SmsMessage>> {
    let lines: Vec<&str> = response.lines().map(str::trim).collect();
    let mut records = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(header) = line.strip_prefix(CMGL_PREFIX) else {
            continue;
        };
        let fields = split_fields(header);
        let body = lines
            .get(i + 1)
            .copied()
            .filter(|next| !next.starts_with(CMGL_PREFIX) && *next != "OK");

        let record = fields
            .first()
            .and_then(|raw| raw.parse::<u32>().ok())
            .ok_or_else(|| ModemError::Parse(format!("bad index in {line:?}")))
            .and_then(|index| parse_record(index, &fields[1..], body));
        records.push(record);
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDU: &str = "07917283010010F5040BC87238880900F10000993092516195800AE8329BFD4697D9EC37";

    #[test]
    fn read_response_pdu_mode() {
        let response = format!("AT+CMGR=4\r\r\n+CMGR: 0,,28\r\n{PDU}\r\n\r\nOK");
        let message = parse_read_response(&response, 4).unwrap();
        assert_eq!(message.index, Some(4));
        assert_eq!(message.from.as_deref(), Some("27838890001"));
        assert_eq!(message.text, "hellohello");
        assert_eq!(message.status.as_deref(), Some("REC UNREAD"));
    }

    #[test]
    fn read_response_text_mode() {
        let response = "+CMGR: \"REC READ\",\"+15550001\",,\"24/01/01,12:00:00+08\"\r\nHi, there\r\n\r\nOK";
        let message = parse_read_response(response, 2).unwrap();
        assert_eq!(message.from.as_deref(), Some("+15550001"));
        assert_eq!(message.text, "Hi, there");
        assert_eq!(message.status.as_deref(), Some("REC READ"));
    }

    #[test]
    fn read_response_without_record_fails() {
        assert!(matches!(
            parse_read_response("\r\nOK", 1),
            Err(ModemError::Parse(_))
        ));
    }

    #[test]
    fn listing_pdu_mode_isolates_bad_record() {
        let response = format!(
            "+CMGL: 1,0,,28\r\n{PDU}\r\n+CMGL: 2,0,,28\r\nNOTHEX\r\n+CMGL: 3,1,,28\r\n{PDU}\r\n\r\nOK"
        );
        let records = parse_listing(&response);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].as_ref().unwrap().index, Some(1));
        assert!(records[1].is_err());
        let third = records[2].as_ref().unwrap();
        assert_eq!(third.index, Some(3));
        assert_eq!(third.status.as_deref(), Some("REC READ"));
    }

    #[test]
    fn listing_text_mode() {
        let response = "+CMGL: 5,\"REC UNREAD\",\"+447911123456\",,\"24/01/01,12:00:00+00\"\r\nPing\r\nOK";
        let records = parse_listing(response);
        let message = records[0].as_ref().unwrap();
        assert_eq!(message.index, Some(5));
        assert_eq!(message.from.as_deref(), Some("+447911123456"));
        assert_eq!(message.text, "Ping");
    }

    #[test]
    fn listing_record_without_body() {
        let records = parse_listing("+CMGL: 7,0,,28\r\nOK");
        assert_eq!(records.len(), 1);
        assert!(records[0].is_err());
    }

    #[test]
    fn empty_listing() {
        assert!(parse_listing("AT+CMGL=0\r\r\nOK").is_empty());
    }

    #[test]
    fn quoted_commas_stay_in_field() {
        assert_eq!(
            split_fields(" \"REC READ\",\"+1\",,\"24/01/01,12:00\""),
            vec!["REC READ", "+1", "", "24/01/01,12:00"]
        );
    }
}
