// ABOUTME: GSM 03.40 Type-of-Number field carried in bits 6..4 of an address type octet
// ABOUTME: Decides whether a decoded address gets a leading + or is read as GSM 7-bit text

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TypeOfNumber {
    Unknown = 0b000,
    International = 0b001,
    National = 0b010,
    NetworkSpecific = 0b011,
    SubscriberNumber = 0b100,
    Alphanumeric = 0b101,
    Abbreviated = 0b110,
    Reserved = 0b111,
}

impl TypeOfNumber {
    /// Extracts the TON from a full address type octet.
    pub fn from_type_octet(octet: u8) -> Self {
        // Three bits always map onto one of the eight variants.
        Self::try_from((octet >> 4) & 0b111).unwrap_or(TypeOfNumber::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_type_octet() {
        assert_eq!(TypeOfNumber::from_type_octet(0x91), TypeOfNumber::International);
        assert_eq!(TypeOfNumber::from_type_octet(0x81), TypeOfNumber::Unknown);
        assert_eq!(TypeOfNumber::from_type_octet(0xD0), TypeOfNumber::Alphanumeric);
        assert_eq!(TypeOfNumber::from_type_octet(0xC8), TypeOfNumber::SubscriberNumber);
    }
}
