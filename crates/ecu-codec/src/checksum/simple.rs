//! Byte-wise checksums

use crate::error::{CodecError, CodecResult};

/// Unsigned byte sum, wrapping at 8 bits
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// XOR of all bytes
pub fn xor8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// K-line packet checksum: sum of every byte except the trailing checksum slot.
///
/// `packet` includes the checksum slot, so it must be at least one byte long.
pub fn packet_checksum(packet: &[u8]) -> CodecResult<u8> {
    match packet.split_last() {
        Some((_, body)) => Ok(sum8(body)),
        None => Err(CodecError::EmptyRegion { start: 0, end: 0 }),
    }
}

/// True iff the trailing byte of `packet` equals [`packet_checksum`]
pub fn verify_packet(packet: &[u8]) -> bool {
    match packet.split_last() {
        Some((&stored, body)) => sum8(body) == stored,
        None => false,
    }
}

/// Append the packet checksum of `body` to it
pub fn seal_packet(body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(body.len() + 1);
    packet.extend_from_slice(body);
    packet.push(sum8(body));
    packet
}
