// ABOUTME: GSM 03.40 service centre timestamp (TP-SCTS) in swapped semi-octet form
// ABOUTME: Parses the 7-octet field into a chrono DateTime carrying the network's UTC offset

use crate::codec::PduError;
use bytes::Buf;
use chrono::{DateTime, FixedOffset, NaiveDate};
use std::io::Cursor;

/// Encoded size of a TP-SCTS field.
pub const SCTS_OCTETS: usize = 7;

/// Two-digit years at or above this value are read as 19xx.
const CENTURY_PIVOT: u8 = 90;

fn swapped_bcd(octet: u8) -> Option<u8> {
    let (tens, units) = (octet & 0x0F, octet >> 4);
    (tens <= 9 && units <= 9).then_some(tens * 10 + units)
}

/// Reads a TP-SCTS field. Returns `Ok(None)` when the seven octets are
/// present but do not form a valid date; only missing octets are an error.
pub fn decode_scts(buf: &mut Cursor<&[u8]>) -> Result<Option<DateTime<FixedOffset>>, PduError> {
    if buf.remaining() < SCTS_OCTETS {
        return Err(PduError::Truncated {
            field: "service centre timestamp",
        });
    }
    let mut raw = [0u8; SCTS_OCTETS];
    buf.copy_to_slice(&mut raw);
    Ok(parse_scts(&raw))
}

/// Converts raw TP-SCTS octets to a timestamp.
///
/// The last octet holds the offset from UTC in quarter hours, with bit 3 of
/// the first semi-octet as the sign.
pub fn parse_scts(raw: &[u8; SCTS_OCTETS]) -> Option<DateTime<FixedOffset>> {
    let year = swapped_bcd(raw[0])?;
    let month = swapped_bcd(raw[1])?;
    let day = swapped_bcd(raw[2])?;
    let hour = swapped_bcd(raw[3])?;
    let minute = swapped_bcd(raw[4])?;
    let second = swapped_bcd(raw[5])?;

    let negative = raw[6] & 0x08 != 0;
    let quarters = swapped_bcd(raw[6] & 0xF7)?;
    let offset_seconds = i32::from(quarters) * 15 * 60;
    let offset = if negative {
        FixedOffset::west_opt(offset_seconds)?
    } else {
        FixedOffset::east_opt(offset_seconds)?
    };

    let full_year = if year >= CENTURY_PIVOT {
        1900 + i32::from(year)
    } else {
        2000 + i32::from(year)
    };

    NaiveDate::from_ymd_opt(full_year, u32::from(month), u32::from(day))?
        .and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second))?
        .and_local_timezone(offset)
        .single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_positive_offset() {
        let raw = [0x99, 0x30, 0x92, 0x51, 0x61, 0x95, 0x80];
        let ts = parse_scts(&raw).unwrap();
        assert_eq!(ts.year(), 1999);
        assert_eq!((ts.month(), ts.day()), (3, 29));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (15, 16, 59));
        assert_eq!(ts.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn test_parse_negative_offset() {
        // 2024-12-01 08:30:00, -05:00 (20 quarters)
        let raw = [0x42, 0x21, 0x10, 0x80, 0x03, 0x00, 0x0A];
        let ts = parse_scts(&raw).unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn test_invalid_date_is_none() {
        let raw = [0x42, 0x31, 0x10, 0x80, 0x03, 0x00, 0x00];
        assert!(parse_scts(&raw).is_none());
        let raw = [0x4F, 0x21, 0x10, 0x80, 0x03, 0x00, 0x00];
        assert!(parse_scts(&raw).is_none());
    }

    #[test]
    fn test_decode_requires_seven_octets() {
        let raw = [0x42, 0x21, 0x10];
        let mut cursor = Cursor::new(&raw[..]);
        assert!(decode_scts(&mut cursor).is_err());
    }
}
