//! CRC algorithms

use ::crc::{Crc, CRC_16_MCRF4XX, CRC_32_ISO_HDLC};

/// CRC-32, IEEE 802.3 polynomial (reflected 0xEDB88320, init/xorout 0xFFFFFFFF)
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// NCS CRC-16: reversed polynomial 0x8408, init 0xFFFF, LSB-first, no final XOR.
///
/// This is the X.25 CRC without its closing XOR, so for any input
/// `crc16_ncs(x) == crc16_x25(x) ^ 0xFFFF`.
const CRC16_NCS: Crc<u16> = Crc::<u16>::new(&CRC_16_MCRF4XX);

/// Standard CRC-32 of `data`
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// NCS-style CRC-16 of `data`
pub fn crc16_ncs(data: &[u8]) -> u16 {
    CRC16_NCS.checksum(data)
}

/// Bitwise reference implementation of [`crc16_ncs`], used to cross-check the table
#[cfg(test)]
fn crc16_ncs_bitwise(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x8408
            } else {
                crc >> 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::crc::CRC_16_IBM_SDLC;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32(CHECK), 0xCBF4_3926);
    }

    #[test]
    fn test_crc16_ncs_check_value() {
        assert_eq!(crc16_ncs(CHECK), 0x6F91);
    }

    #[test]
    fn test_crc16_ncs_is_x25_without_final_xor() {
        let x25 = Crc::<u16>::new(&CRC_16_IBM_SDLC);
        assert_eq!(x25.checksum(CHECK), 0x906E);
        assert_eq!(crc16_ncs(CHECK), x25.checksum(CHECK) ^ 0xFFFF);
    }

    #[test]
    fn test_crc16_ncs_matches_bitwise() {
        let data: Vec<u8> = (0..=255u8).collect();
        assert_eq!(crc16_ncs(&data), crc16_ncs_bitwise(&data));
        assert_eq!(crc16_ncs(&[]), 0xFFFF);
    }
}
