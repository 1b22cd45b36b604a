// ABOUTME: GSM 03.38 default alphabet with its extension table, plus septet packing
// ABOUTME: Converts text to septets and back, and packs septets into octets with fill bits

/// Escape septet that introduces a character from the extension table.
pub const ESCAPE: u8 = 0x1B;

/// GSM 03.38 default alphabet, indexed by septet value. Slot 0x1B is the
/// escape code and never matches a character on encode.
const DEFAULT_ALPHABET: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å', //
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1B}', 'Æ', 'æ', 'ß', 'É', //
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/', //
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?', //
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', //
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§', //
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', //
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à', //
];

/// Extension table entries as (septet following the escape, character).
const EXTENSION_TABLE: [(u8, char); 10] = [
    (0x0A, '\u{0C}'),
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2F, '\\'),
    (0x3C, '['),
    (0x3D, '~'),
    (0x3E, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

fn default_septet(c: char) -> Option<u8> {
    if c == '\u{1B}' {
        return None;
    }
    DEFAULT_ALPHABET
        .iter()
        .position(|&candidate| candidate == c)
        .map(|index| index as u8)
}

fn extension_septet(c: char) -> Option<u8> {
    EXTENSION_TABLE
        .iter()
        .find(|(_, candidate)| *candidate == c)
        .map(|(septet, _)| *septet)
}

/// Returns true when `c` can be sent in the default alphabet, either
/// directly or through the extension table.
pub fn is_gsm7_char(c: char) -> bool {
    default_septet(c).is_some() || extension_septet(c).is_some()
}

/// Returns true when every character of `text` fits the default alphabet.
pub fn is_gsm7_text(text: &str) -> bool {
    text.chars().all(is_gsm7_char)
}

/// Converts text to unpacked septets. Extension characters take two
/// septets (escape + code). Returns `None` if any character is outside
/// the alphabet.
pub fn encode_septets(text: &str) -> Option<Vec<u8>> {
    let mut septets = Vec::with_capacity(text.len());
    for c in text.chars() {
        if let Some(septet) = default_septet(c) {
            septets.push(septet);
        } else if let Some(septet) = extension_septet(c) {
            septets.push(ESCAPE);
            septets.push(septet);
        } else {
            return None;
        }
    }
    Some(septets)
}

/// Converts unpacked septets back to text. An escape followed by an
/// unknown code falls back to the default-table character, and a dangling
/// trailing escape is dropped.
pub fn decode_septets(septets: &[u8]) -> String {
    let mut text = String::with_capacity(septets.len());
    let mut iter = septets.iter().map(|s| s & 0x7F);
    while let Some(septet) = iter.next() {
        if septet == ESCAPE {
            let Some(code) = iter.next() else {
                break;
            };
            let c = EXTENSION_TABLE
                .iter()
                .find(|(candidate, _)| *candidate == code)
                .map(|(_, c)| *c)
                .unwrap_or(DEFAULT_ALPHABET[code as usize]);
            text.push(c);
        } else {
            text.push(DEFAULT_ALPHABET[septet as usize]);
        }
    }
    text
}

/// Packs septets LSB-first into octets, starting after `fill_bits` zero
/// bits. The fill aligns the first septet after a user data header.
pub fn pack(septets: &[u8], fill_bits: usize) -> Vec<u8> {
    let total_bits = fill_bits + septets.len() * 7;
    let mut out = vec![0u8; total_bits.div_ceil(8)];

    for (i, &septet) in septets.iter().enumerate() {
        let bit = fill_bits + i * 7;
        let (byte, shift) = (bit / 8, bit % 8);
        let value = u16::from(septet & 0x7F) << shift;
        out[byte] |= value as u8;
        if shift > 1 {
            out[byte + 1] |= (value >> 8) as u8;
        }
    }

    out
}

/// Unpacks `count` septets from `data`, skipping `fill_bits` leading bits.
/// Stops early if the data runs out.
pub fn unpack(data: &[u8], fill_bits: usize, count: usize) -> Vec<u8> {
    let mut septets = Vec::with_capacity(count);
    for i in 0..count {
        let bit = fill_bits + i * 7;
        let (byte, shift) = (bit / 8, bit % 8);
        let Some(&lo) = data.get(byte) else {
            break;
        };
        let hi = data.get(byte + 1).copied().unwrap_or(0);
        let word = u16::from(hi) << 8 | u16::from(lo);
        septets.push(((word >> shift) & 0x7F) as u8);
    }
    septets
}

/// Number of fill bits needed so septets start on a septet boundary after
/// a user data header of `header_octets` octets (including its length octet).
pub fn fill_bits_after_header(header_octets: usize) -> usize {
    (7 - (header_octets * 8) % 7) % 7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_hello() {
        let septets = encode_septets("hello").unwrap();
        assert_eq!(pack(&septets, 0), vec![0xE8, 0x32, 0x9B, 0xFD, 0x06]);
    }

    #[test]
    fn test_unpack_hellohello() {
        let data = [0xE8, 0x32, 0x9B, 0xFD, 0x46, 0x97, 0xD9, 0xEC, 0x37];
        let septets = unpack(&data, 0, 10);
        assert_eq!(decode_septets(&septets), "hellohello");
    }

    #[test]
    fn test_extension_characters_use_escape() {
        let septets = encode_septets("a€[").unwrap();
        assert_eq!(septets, vec![0x61, ESCAPE, 0x65, ESCAPE, 0x3C]);
        assert_eq!(decode_septets(&septets), "a€[");
    }

    #[test]
    fn test_non_gsm_text_is_rejected() {
        assert!(encode_septets("Привет").is_none());
        assert!(!is_gsm7_text("hi 😀"));
        assert!(is_gsm7_text("Test £ @ message ΔΩ"));
    }

    #[test]
    fn test_pack_with_fill_bits() {
        // A 6-octet concatenation header needs one fill bit.
        assert_eq!(fill_bits_after_header(6), 1);
        assert_eq!(fill_bits_after_header(7), 0);

        let septets = encode_septets("concatenated text").unwrap();
        let packed = pack(&septets, 1);
        assert_eq!(unpack(&packed, 1, septets.len()), septets);
    }

    #[test]
    fn test_dangling_escape_is_dropped() {
        assert_eq!(decode_septets(&[0x41, ESCAPE]), "A");
    }
}
