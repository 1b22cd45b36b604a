// ABOUTME: User data header (UDH) support for concatenated SMS
// ABOUTME: Writes the 8-bit reference concatenation element and parses both reference widths

use bytes::{BufMut, BytesMut};

/// Information element identifier: concatenated SMS, 8-bit reference.
pub const IEI_CONCAT_8BIT: u8 = 0x00;
/// Information element identifier: concatenated SMS, 16-bit reference.
pub const IEI_CONCAT_16BIT: u8 = 0x08;

/// Position of one segment within a concatenated message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConcatInfo {
    /// Message reference shared by every segment.
    pub reference: u16,
    /// Number of segments in the message.
    pub total: u8,
    /// 1-based index of this segment.
    pub part: u8,
}

impl ConcatInfo {
    /// Writes a complete header (length octet included) with an 8-bit
    /// reference. Only the low byte of `reference` is sent.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0x05);
        buf.put_u8(IEI_CONCAT_8BIT);
        buf.put_u8(0x03);
        buf.put_u8(self.reference as u8);
        buf.put_u8(self.total);
        buf.put_u8(self.part);
    }
}

/// Scans the information elements of a header (without its length octet)
/// for a concatenation element. Unknown elements are skipped; a malformed
/// element list simply yields `None`.
pub fn parse_concat(header: &[u8]) -> Option<ConcatInfo> {
    let mut rest = header;
    while let [iei, len, tail @ ..] = rest {
        let len = usize::from(*len);
        let data = tail.get(..len)?;
        match (*iei, data) {
            (IEI_CONCAT_8BIT, [reference, total, part]) => {
                return Some(ConcatInfo {
                    reference: u16::from(*reference),
                    total: *total,
                    part: *part,
                });
            }
            (IEI_CONCAT_16BIT, [hi, lo, total, part]) => {
                return Some(ConcatInfo {
                    reference: u16::from_be_bytes([*hi, *lo]),
                    total: *total,
                    part: *part,
                });
            }
            _ => rest = &tail[len..],
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_concat_header() {
        let info = ConcatInfo {
            reference: 0x42,
            total: 3,
            part: 2,
        };
        let mut buf = BytesMut::new();
        info.encode(&mut buf);
        assert_eq!(buf.as_ref(), &[0x05, 0x00, 0x03, 0x42, 0x03, 0x02]);
    }

    #[test]
    fn test_parse_8bit_reference() {
        let info = parse_concat(&[0x00, 0x03, 0x42, 0x03, 0x02]).unwrap();
        assert_eq!(info.reference, 0x42);
        assert_eq!((info.part, info.total), (2, 3));
    }

    #[test]
    fn test_parse_16bit_reference_after_unknown_element() {
        // Port addressing element first, then concatenation
        let header = [0x05, 0x04, 0x0B, 0x84, 0x23, 0xF0, 0x08, 0x04, 0x12, 0x34, 0x02, 0x01];
        let info = parse_concat(&header).unwrap();
        assert_eq!(info.reference, 0x1234);
        assert_eq!((info.part, info.total), (1, 2));
    }

    #[test]
    fn test_truncated_element_is_ignored() {
        assert!(parse_concat(&[0x00, 0x03, 0x42]).is_none());
        assert!(parse_concat(&[]).is_none());
    }
}
