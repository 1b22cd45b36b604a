// ABOUTME: Phone-number normalization and GSM 03.40 semi-octet address encoding
// ABOUTME: Converts destination strings to TP-DA fields and parses TP-OA/TP-DA fields back

use crate::codec::{PduError, decode_u8};
use crate::datatypes::{NumericPlanIndicator, TypeOfNumber, gsm7};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;
use std::io::Cursor;

/// Country code assumed for numbers written with a single leading trunk `0`.
pub const DEFAULT_COUNTRY_CODE: &str = "1";

/// Semi-octets a TP-DA address value can hold.
pub const MAX_ADDRESS_DIGITS: usize = 20;

/// Normalizes a phone number to international form using
/// [`DEFAULT_COUNTRY_CODE`] for trunk-prefixed numbers.
///
/// ```
/// use serialsms::datatypes::format_phone_number;
///
/// assert_eq!(format_phone_number("+447911123456"), "+447911123456");
/// assert_eq!(format_phone_number("0081234567"), "+81234567");
/// assert_eq!(format_phone_number("08123456789"), "+18123456789");
/// ```
pub fn format_phone_number(number: &str) -> String {
    format_phone_number_with_country(number, DEFAULT_COUNTRY_CODE)
}

/// Normalizes a phone number: whitespace is removed, a leading `+` is kept,
/// a leading `00` becomes `+`, a single leading `0` becomes `+<country_code>`.
/// Anything else is passed through.
pub fn format_phone_number_with_country(number: &str, country_code: &str) -> String {
    let cleaned: String = number.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.starts_with('+') {
        cleaned
    } else if let Some(rest) = cleaned.strip_prefix("00") {
        format!("+{rest}")
    } else if let Some(rest) = cleaned.strip_prefix('0') {
        format!("+{country_code}{rest}")
    } else {
        cleaned
    }
}

/// Loose phone number check: optional `+`, a non-zero first digit, 2-15
/// digits in total. Whitespace is ignored. This is not E.164 validation.
pub fn validate_phone_number(number: &str) -> bool {
    let cleaned: String = number.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);

    (2..=15).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0')
}

/// An SMS address field (TP-OA or TP-DA).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    /// Digits with a leading `+` for international numbers, or the decoded
    /// text of an alphanumeric sender.
    pub value: String,
    pub ton: TypeOfNumber,
    pub npi: NumericPlanIndicator,
}

impl Address {
    /// Builds a destination address from an already normalized number.
    pub fn from_number(number: &str) -> Result<Self, PduError> {
        let (digits, ton) = match number.strip_prefix('+') {
            Some(rest) => (rest, TypeOfNumber::International),
            None => (number, TypeOfNumber::Unknown),
        };

        if digits.is_empty()
            || digits.len() > MAX_ADDRESS_DIGITS
            || !digits.chars().all(|c| c.is_ascii_digit())
        {
            return Err(PduError::InvalidDestination(number.to_string()));
        }

        Ok(Self {
            value: number.to_string(),
            ton,
            npi: NumericPlanIndicator::Isdn,
        })
    }

    /// Returns the digits without any `+` prefix.
    pub fn digits(&self) -> &str {
        self.value.strip_prefix('+').unwrap_or(&self.value)
    }

    /// Type-of-address octet: extension bit, TON and NPI.
    pub fn type_octet(&self) -> u8 {
        0x80 | (u8::from(self.ton) << 4) | u8::from(self.npi)
    }

    /// Writes the address as length (in digits), type octet and swapped BCD.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), PduError> {
        let digits = self.digits().as_bytes();
        let length = u8::try_from(digits.len())
            .map_err(|_| PduError::InvalidDestination(self.value.clone()))?;

        buf.put_u8(length);
        buf.put_u8(self.type_octet());
        for pair in digits.chunks(2) {
            let low = pair[0] - b'0';
            let high = pair.get(1).map_or(0x0F, |d| d - b'0');
            buf.put_u8(high << 4 | low);
        }
        Ok(())
    }

    /// Reads an address field. The length octet counts semi-octets for
    /// numeric addresses; alphanumeric addresses carry packed GSM 7-bit text
    /// in the same number of semi-octets.
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, PduError> {
        let length = decode_u8(buf, "address length")? as usize;
        let type_octet = decode_u8(buf, "address type")?;
        let octets = length.div_ceil(2);

        if buf.remaining() < octets {
            return Err(PduError::Truncated { field: "address" });
        }
        let raw = buf.copy_to_bytes(octets);

        let ton = TypeOfNumber::from_type_octet(type_octet);
        let npi = NumericPlanIndicator::try_from(type_octet & 0x0F)
            .unwrap_or(NumericPlanIndicator::Unknown);

        let value = match ton {
            TypeOfNumber::Alphanumeric => {
                let septets = gsm7::unpack(&raw, 0, length * 4 / 7);
                gsm7::decode_septets(&septets)
            }
            _ => {
                let mut value = String::with_capacity(length + 1);
                if ton == TypeOfNumber::International {
                    value.push('+');
                }
                let nibbles = raw.iter().flat_map(|octet| [octet & 0x0F, octet >> 4]);
                for nibble in nibbles.take(length) {
                    match nibble {
                        0..=9 => value.push(char::from(b'0' + nibble)),
                        0x0A => value.push('*'),
                        0x0B => value.push('#'),
                        0x0F => break,
                        _ => value.push(char::from(b'a' + nibble - 0x0C)),
                    }
                }
                value
            }
        };

        Ok(Self { value, ton, npi })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_phone_number() {
        assert_eq!(format_phone_number("0081234567"), "+81234567");
        assert_eq!(format_phone_number("08123456789"), "+18123456789");
        assert_eq!(format_phone_number("+447911123456"), "+447911123456");
        assert_eq!(format_phone_number("447911123456"), "447911123456");
        assert_eq!(format_phone_number("+44 7911 123 456"), "+447911123456");
    }

    #[test]
    fn test_format_with_custom_country() {
        assert_eq!(format_phone_number_with_country("0612345678", "48"), "+48612345678");
    }

    #[test]
    fn test_validate_phone_number() {
        assert!(validate_phone_number("+447911123456"));
        assert!(validate_phone_number("15550001"));
        assert!(validate_phone_number("+1 555 0001"));
        assert!(!validate_phone_number("+0123"));
        assert!(!validate_phone_number("1"));
        assert!(!validate_phone_number("+1234567890123456"));
        assert!(!validate_phone_number("12ab"));
    }

    #[test]
    fn test_encode_international_address() {
        let address = Address::from_number("+15550001").unwrap();
        let mut buf = BytesMut::new();
        address.encode(&mut buf).unwrap();
        assert_eq!(hex::encode_upper(&buf), "089151550010");
    }

    #[test]
    fn test_encode_odd_length_pads_with_f() {
        let address = Address::from_number("12345").unwrap();
        let mut buf = BytesMut::new();
        address.encode(&mut buf).unwrap();
        assert_eq!(hex::encode_upper(&buf), "05812143F5");
    }

    #[test]
    fn test_decode_subscriber_address() {
        let raw = hex::decode("0BC87238880900F1").unwrap();
        let mut cursor = Cursor::new(raw.as_slice());
        let address = Address::decode(&mut cursor).unwrap();
        assert_eq!(address.value, "27838890001");
        assert_eq!(address.ton, TypeOfNumber::SubscriberNumber);
    }

    #[test]
    fn test_decode_alphanumeric_address() {
        let septets = gsm7::encode_septets("Google").unwrap();
        let packed = gsm7::pack(&septets, 0);
        let mut raw = vec![(packed.len() * 2) as u8, 0xD0];
        raw.extend_from_slice(&packed);

        let mut cursor = Cursor::new(raw.as_slice());
        let address = Address::decode(&mut cursor).unwrap();
        assert_eq!(address.ton, TypeOfNumber::Alphanumeric);
        assert_eq!(address.value, "Google");
    }

    #[test]
    fn test_decode_truncated_address() {
        let raw = [0x0B, 0x91, 0x51];
        let mut cursor = Cursor::new(&raw[..]);
        assert!(matches!(
            Address::decode(&mut cursor),
            Err(PduError::Truncated { .. })
        ));
    }

    #[test]
    fn test_rejects_non_numeric_destination() {
        assert!(Address::from_number("+1555ABC").is_err());
        assert!(Address::from_number("+").is_err());
    }

    #[test]
    fn test_rejects_destination_longer_than_address_field() {
        let longest = "9".repeat(MAX_ADDRESS_DIGITS);
        assert!(Address::from_number(&longest).is_ok());

        let too_long = format!("+{}", "9".repeat(MAX_ADDRESS_DIGITS + 1));
        assert_eq!(
            Address::from_number(&too_long),
            Err(PduError::InvalidDestination(too_long.clone()))
        );
    }
}
