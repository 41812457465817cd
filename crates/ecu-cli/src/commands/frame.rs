//! Frame command - ISO 14230 framing of K-line messages

use anyhow::{bail, Context, Result};
use ecu_codec::frame::{encode_message, parse_frames, FRAME_OVERHEAD};

use crate::output::{FrameRow, OutputContext};

/// Split a message into wire frames
pub fn encode_rows(message: &[u8]) -> Result<Vec<FrameRow>> {
    let frames = encode_message(message).context("Cannot frame message")?;
    Ok(frames
        .iter()
        .enumerate()
        .map(|(index, frame)| FrameRow {
            index,
            payload: hex::encode_upper(frame.payload()),
            bytes: hex::encode_upper(frame.to_bytes()),
            valid: true,
        })
        .collect())
}

/// Parse a captured byte stream; also returns how many bytes were consumed
pub fn decode_rows(stream: &[u8]) -> (Vec<FrameRow>, usize) {
    let mut consumed = 0;
    let rows = parse_frames(stream)
        .into_iter()
        .enumerate()
        .map(|(index, frame)| {
            let len = frame.payload.len() + FRAME_OVERHEAD;
            let bytes = &stream[consumed..consumed + len];
            consumed += len;
            FrameRow {
                index,
                payload: hex::encode_upper(&frame.payload),
                bytes: hex::encode_upper(bytes),
                valid: frame.is_valid,
            }
        })
        .collect();
    (rows, consumed)
}

pub fn frame_encode(message: &[u8], ctx: &OutputContext) -> Result<()> {
    ctx.print(&encode_rows(message)?);
    Ok(())
}

pub fn frame_decode(stream: &[u8], ctx: &OutputContext) -> Result<()> {
    let (rows, consumed) = decode_rows(stream);
    if rows.is_empty() {
        bail!("No complete frame in {} bytes", stream.len());
    }
    ctx.print(&rows);
    if consumed < stream.len() {
        ctx.warn(&format!(
            "{} trailing bytes do not form a frame",
            stream.len() - consumed
        ));
    }
    if rows.iter().any(|r| !r.valid) {
        ctx.warn("Some frames failed their checksum");
    }
    Ok(())
}
