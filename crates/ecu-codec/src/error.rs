//! Error types for the codec library

use thiserror::Error;

/// Errors raised for malformed input.
///
/// Each variant names exactly one violated constraint. Validation *mismatches*
/// (a stored checksum that does not match) are never errors; they are reported
/// as data by the checksum functions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// An offset is not a multiple of the required alignment
    #[error("alignment: {what} 0x{offset:X} is not {alignment}-byte aligned")]
    Misaligned {
        what: &'static str,
        offset: usize,
        alignment: usize,
    },

    /// A region or location extends past the end of the buffer
    #[error("out of bounds: {what} ends at 0x{end:X} but buffer is 0x{len:X} bytes")]
    OutOfBounds {
        what: &'static str,
        end: usize,
        len: usize,
    },

    /// A region has `start >= end`
    #[error("empty region: start 0x{start:X} must be below end 0x{end:X}")]
    EmptyRegion { start: usize, end: usize },

    /// Two buffers (or a buffer and a fixed image size) disagree in length
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Frame payloads must be 1-7 bytes
    #[error("invalid payload length {0}: frame payload must be 1-7 bytes")]
    InvalidPayloadLength(usize),

    /// Bit lengths must be 1-32 bits
    #[error("invalid bit range: length {length} at offset {offset}")]
    InvalidBitRange { offset: usize, length: usize },

    /// No telemetry block with this tag
    #[error("unknown telemetry block: {0}")]
    UnknownBlock(String),

    /// Synthetic PID below the base or past the last block
    #[error("invalid synthetic PID {0}")]
    InvalidPid(u32),

    /// Parameter index past a block's declared parameter count
    #[error("parameter index {index} out of range for block {block} ({count} parameters)")]
    ParameterOutOfRange {
        block: char,
        index: usize,
        count: usize,
    },
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Check that `[start, end)` is a non-empty, `alignment`-aligned region inside `len`.
///
/// Checks run in a fixed order (alignment, empty region, bounds) so callers see
/// the same error for the same input regardless of which algorithm they called.
pub(crate) fn check_region(
    start: usize,
    end: usize,
    len: usize,
    alignment: usize,
) -> CodecResult<()> {
    check_aligned("region start", start, alignment)?;
    check_aligned("region end", end, alignment)?;
    if start >= end {
        return Err(CodecError::EmptyRegion { start, end });
    }
    if end > len {
        return Err(CodecError::OutOfBounds {
            what: "region",
            end,
            len,
        });
    }
    Ok(())
}

pub(crate) fn check_aligned(what: &'static str, offset: usize, alignment: usize) -> CodecResult<()> {
    if alignment == 0 || offset % alignment != 0 {
        return Err(CodecError::Misaligned {
            what,
            offset,
            alignment,
        });
    }
    Ok(())
}

/// Check that a `width`-byte storage location at `offset` fits inside `len`.
pub(crate) fn check_location(
    what: &'static str,
    offset: usize,
    width: usize,
    len: usize,
) -> CodecResult<()> {
    check_aligned(what, offset, width.min(4))?;
    let end = offset.checked_add(width).unwrap_or(usize::MAX);
    if end > len {
        return Err(CodecError::OutOfBounds { what, end, len });
    }
    Ok(())
}
