// ABOUTME: GSM 03.38 data coding scheme handling reduced to the three SMS alphabets
// ABOUTME: Picks the alphabet for outgoing text and reports per-segment capacities

use crate::datatypes::gsm7;
use std::fmt;

/// Maximum user data length of one SMS TPDU in octets.
pub const MAX_USER_DATA_OCTETS: usize = 140;

/// Octets used by an 8-bit-reference concatenation header, length octet included.
pub const CONCAT_HEADER_OCTETS: usize = 6;

/// Character alphabet of the user data, as selected by the DCS octet.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Alphabet {
    /// GSM 7-bit default alphabet (the narrow alphabet)
    #[default]
    Gsm7,
    /// 8-bit data
    EightBit,
    /// UCS-2 / UTF-16BE (the wide alphabet)
    Ucs2,
}

impl Alphabet {
    /// Selects the narrow alphabet when every character fits it, the wide
    /// alphabet otherwise.
    pub fn for_text(text: &str) -> Self {
        if gsm7::is_gsm7_text(text) {
            Alphabet::Gsm7
        } else {
            Alphabet::Ucs2
        }
    }

    /// Interprets a data coding scheme octet.
    ///
    /// Covers the general data coding group (00xx), the message waiting
    /// groups (1100-1110) and the data coding/message class group (1111).
    /// Reserved values fall back to the default alphabet.
    pub fn from_dcs(dcs: u8) -> Self {
        match dcs >> 4 {
            0x0..=0x3 => match (dcs >> 2) & 0b11 {
                0b01 => Alphabet::EightBit,
                0b10 => Alphabet::Ucs2,
                _ => Alphabet::Gsm7,
            },
            0xC | 0xD => Alphabet::Gsm7,
            0xE => Alphabet::Ucs2,
            0xF if dcs & 0b0100 != 0 => Alphabet::EightBit,
            _ => Alphabet::Gsm7,
        }
    }

    /// DCS octet used when sending in this alphabet (no message class).
    pub fn dcs(&self) -> u8 {
        match self {
            Alphabet::Gsm7 => 0x00,
            Alphabet::EightBit => 0x04,
            Alphabet::Ucs2 => 0x08,
        }
    }

    /// Units (septets, octets or UTF-16 code units) that fit a lone segment.
    pub fn single_segment_capacity(&self) -> usize {
        self.capacity_for(MAX_USER_DATA_OCTETS)
    }

    /// Units that fit a segment carrying a concatenation header.
    pub fn concatenated_segment_capacity(&self) -> usize {
        self.capacity_for(MAX_USER_DATA_OCTETS - CONCAT_HEADER_OCTETS)
    }

    fn capacity_for(&self, octets: usize) -> usize {
        match self {
            Alphabet::Gsm7 => octets * 8 / 7,
            Alphabet::EightBit => octets,
            Alphabet::Ucs2 => octets / 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Alphabet::Gsm7 => "GSM 7-bit Default",
            Alphabet::EightBit => "8-bit data",
            Alphabet::Ucs2 => "UCS-2",
        }
    }
}

impl fmt::Display for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.dcs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphabet_for_text() {
        assert_eq!(Alphabet::for_text("Hello World"), Alphabet::Gsm7);
        assert_eq!(Alphabet::for_text("Price: 5€"), Alphabet::Gsm7);
        assert_eq!(Alphabet::for_text("Zażółć"), Alphabet::Ucs2);
        assert_eq!(Alphabet::for_text("Hello 😀"), Alphabet::Ucs2);
    }

    #[test]
    fn test_alphabet_from_dcs() {
        assert_eq!(Alphabet::from_dcs(0x00), Alphabet::Gsm7);
        assert_eq!(Alphabet::from_dcs(0x04), Alphabet::EightBit);
        assert_eq!(Alphabet::from_dcs(0x08), Alphabet::Ucs2);
        // Class 0 flash message in UCS-2
        assert_eq!(Alphabet::from_dcs(0x18), Alphabet::Ucs2);
        assert_eq!(Alphabet::from_dcs(0xF0), Alphabet::Gsm7);
        assert_eq!(Alphabet::from_dcs(0xF4), Alphabet::EightBit);
        assert_eq!(Alphabet::from_dcs(0xE0), Alphabet::Ucs2);
    }

    #[test]
    fn test_segment_capacities() {
        assert_eq!(Alphabet::Gsm7.single_segment_capacity(), 160);
        assert_eq!(Alphabet::Gsm7.concatenated_segment_capacity(), 153);
        assert_eq!(Alphabet::Ucs2.single_segment_capacity(), 70);
        assert_eq!(Alphabet::Ucs2.concatenated_segment_capacity(), 67);
        assert_eq!(Alphabet::EightBit.single_segment_capacity(), 140);
    }

    #[test]
    fn test_display() {
        assert_eq!(Alphabet::Ucs2.to_string(), "UCS-2 (0x08)");
    }
}
