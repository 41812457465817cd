//! Big-endian bit-field access
//!
//! Bit 0 is the most significant bit of byte 0, bit 7 the least significant
//! bit of byte 0, bit 8 the most significant bit of byte 1 and so on. This is
//! the layout used by RAX telemetry blocks.

use crate::error::{CodecError, CodecResult};

/// Widest field a single call can read or write
pub const MAX_BITS: usize = 32;

/// Validate a field and return the `[first_byte, end_byte)` span it touches
fn field_span(len: usize, bit_offset: usize, bit_length: usize) -> CodecResult<(usize, usize)> {
    if bit_length == 0 || bit_length > MAX_BITS {
        return Err(CodecError::InvalidBitRange {
            offset: bit_offset,
            length: bit_length,
        });
    }
    let end_bit = bit_offset + bit_length;
    let end_byte = end_bit.div_ceil(8);
    if end_byte > len {
        return Err(CodecError::OutOfBounds {
            what: "bit field",
            end: end_byte,
            len,
        });
    }
    Ok((bit_offset / 8, end_byte))
}

/// Read an unsigned `bit_length`-bit integer starting at `bit_offset`
pub fn extract_bits(buf: &[u8], bit_offset: usize, bit_length: usize) -> CodecResult<u32> {
    let (first, end) = field_span(buf.len(), bit_offset, bit_length)?;

    // At most 5 bytes: 7 leading bits + 32 field bits
    let window = buf[first..end]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    let trailing = (end - first) * 8 - (bit_offset % 8) - bit_length;
    let mask = (1u64 << bit_length) - 1;
    Ok(((window >> trailing) & mask) as u32)
}

/// Write the low `bit_length` bits of `value` at `bit_offset`, leaving
/// surrounding bits untouched
pub fn insert_bits(
    buf: &mut [u8],
    bit_offset: usize,
    bit_length: usize,
    value: u32,
) -> CodecResult<()> {
    let (first, end) = field_span(buf.len(), bit_offset, bit_length)?;

    let span = end - first;
    let window = buf[first..end]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    let trailing = span * 8 - (bit_offset % 8) - bit_length;
    let mask = ((1u64 << bit_length) - 1) << trailing;
    let window = (window & !mask) | ((u64::from(value) << trailing) & mask);

    for (i, byte) in buf[first..end].iter_mut().enumerate() {
        *byte = (window >> ((span - 1 - i) * 8)) as u8;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_nine_bits_at_zero() {
        // 350 = 0b1_0101_1110 -> 0xAF, 0x00
        let buf = [0xAF, 0x00];
        assert_eq!(extract_bits(&buf, 0, 9).unwrap(), 350);

        let mut built = [0u8; 2];
        insert_bits(&mut built, 0, 9, 350).unwrap();
        assert_eq!(built, buf);
    }

    #[rstest]
    #[case(0, 1, 1)]
    #[case(1, 1, 0)]
    #[case(4, 8, 0x5A)]
    #[case(0, 16, 0xA5A5)]
    #[case(3, 32, 0x2D2D_2D2D)]
    fn test_extract_known_fields(#[case] offset: usize, #[case] length: usize, #[case] expected: u32) {
        let buf = [0xA5u8; 6];
        assert_eq!(extract_bits(&buf, offset, length).unwrap(), expected);
    }

    #[test]
    fn test_insert_preserves_neighbours() {
        let mut buf = [0xFFu8; 4];
        insert_bits(&mut buf, 6, 7, 0).unwrap();
        assert_eq!(buf, [0xFC, 0x07, 0xFF, 0xFF]);
        assert_eq!(extract_bits(&buf, 6, 7).unwrap(), 0);
        assert_eq!(extract_bits(&buf, 0, 6).unwrap(), 0x3F);
        assert_eq!(extract_bits(&buf, 13, 19).unwrap(), 0x7_FFFF);
    }

    #[test]
    fn test_insert_truncates_value_to_width() {
        let mut buf = [0u8; 2];
        insert_bits(&mut buf, 4, 4, 0x1F).unwrap();
        assert_eq!(buf, [0x0F, 0x00]);
    }

    #[test]
    fn test_full_width_round_trip_at_odd_offset() {
        let mut buf = [0u8; 6];
        insert_bits(&mut buf, 5, 32, 0xDEAD_BEEF).unwrap();
        assert_eq!(extract_bits(&buf, 5, 32).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_rejects_bad_ranges() {
        let buf = [0u8; 2];
        assert!(matches!(
            extract_bits(&buf, 0, 0),
            Err(CodecError::InvalidBitRange { .. })
        ));
        assert!(matches!(
            extract_bits(&[0u8; 8], 0, 33),
            Err(CodecError::InvalidBitRange { .. })
        ));
        assert!(matches!(
            extract_bits(&buf, 8, 9),
            Err(CodecError::OutOfBounds { what: "bit field", .. })
        ));
        assert!(extract_bits(&buf, 7, 9).is_ok());
    }
}
