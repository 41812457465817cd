//! ISO 14230 short-frame codec
//!
//! Wire format: `[PCI][payload (1-7 bytes)][checksum]`
//!
//! - PCI low nibble carries the payload length (the high nibble is zero for
//!   frames produced here and ignored on decode)
//! - checksum is the 8-bit wrapping sum of the PCI and payload bytes

use serde::{Deserialize, Serialize};

use crate::checksum::simple::sum8;
use crate::error::{CodecError, CodecResult};

/// Largest payload a single frame can carry
pub const MAX_PAYLOAD: usize = 7;

/// Bytes of framing around the payload (PCI + checksum)
pub const FRAME_OVERHEAD: usize = 2;

/// An encoded frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pci: u8,
    payload: Vec<u8>,
    checksum: u8,
}

impl Frame {
    /// Build a frame around `payload`, rejecting empty or oversized payloads
    pub fn new(payload: &[u8]) -> CodecResult<Self> {
        if payload.is_empty() || payload.len() > MAX_PAYLOAD {
            return Err(CodecError::InvalidPayloadLength(payload.len()));
        }
        let pci = payload.len() as u8;
        let checksum = sum8(payload).wrapping_add(pci);
        Ok(Self {
            pci,
            payload: payload.to_vec(),
            checksum,
        })
    }

    pub fn pci(&self) -> u8 {
        self.pci
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + FRAME_OVERHEAD);
        bytes.push(self.pci);
        bytes.extend_from_slice(&self.payload);
        bytes.push(self.checksum);
        bytes
    }
}

/// Result of decoding one frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedFrame {
    /// Payload bytes (empty when the buffer is structurally short)
    pub payload: Vec<u8>,
    /// True iff the trailing checksum matches recomputation
    pub is_valid: bool,
}

impl DecodedFrame {
    fn malformed() -> Self {
        Self {
            payload: Vec::new(),
            is_valid: false,
        }
    }
}

/// Encode a 1-7 byte payload as `[PCI][payload][checksum]`
pub fn encode(payload: &[u8]) -> CodecResult<Vec<u8>> {
    Frame::new(payload).map(|f| f.to_bytes())
}

/// Payload length announced by a PCI byte, if it is a legal frame length
fn announced_length(pci: u8) -> Option<usize> {
    let len = (pci & 0x0F) as usize;
    (1..=MAX_PAYLOAD).contains(&len).then_some(len)
}

/// Decode one frame from the start of `bytes`.
///
/// A short buffer or an illegal length nibble yields `is_valid == false` with an
/// empty payload. A checksum mismatch yields the payload with `is_valid == false`.
pub fn decode(bytes: &[u8]) -> DecodedFrame {
    let Some(&pci) = bytes.first() else {
        return DecodedFrame::malformed();
    };
    let Some(len) = announced_length(pci) else {
        return DecodedFrame::malformed();
    };
    if bytes.len() < len + FRAME_OVERHEAD {
        return DecodedFrame::malformed();
    }

    let body = &bytes[..=len];
    let checksum = bytes[len + 1];
    DecodedFrame {
        payload: body[1..].to_vec(),
        is_valid: sum8(body) == checksum,
    }
}

/// Split a byte stream into consecutive frames.
///
/// Scanning stops at a trailing incomplete frame or at a PCI byte with an
/// illegal length nibble. Frames with a bad checksum are returned with
/// `is_valid == false`; the caller decides whether to retry.
pub fn parse_frames(stream: &[u8]) -> Vec<DecodedFrame> {
    let mut frames = Vec::new();
    let mut pos = 0;

    while pos < stream.len() {
        let Some(len) = announced_length(stream[pos]) else {
            break;
        };
        let frame_len = len + FRAME_OVERHEAD;
        if pos + frame_len > stream.len() {
            break;
        }
        frames.push(decode(&stream[pos..pos + frame_len]));
        pos += frame_len;
    }

    frames
}

/// Split an arbitrary-length message into frames of at most [`MAX_PAYLOAD`] bytes
pub fn encode_message(message: &[u8]) -> CodecResult<Vec<Frame>> {
    if message.is_empty() {
        return Err(CodecError::InvalidPayloadLength(0));
    }
    message.chunks(MAX_PAYLOAD).map(Frame::new).collect()
}
