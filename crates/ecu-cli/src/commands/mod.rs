//! Command implementations for ecutool

pub mod checksum;
pub mod crc;
pub mod decode;
pub mod diff;
pub mod frame;
pub mod pids;

pub use checksum::{checksum, SchemeArgs};
pub use crc::crc;
pub use decode::decode;
pub use diff::diff;
pub use frame::{frame_decode, frame_encode};
pub use pids::pids;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::output::OutputContext;

/// Read a ROM image, with a spinner while the file loads
pub fn read_image(path: &Path, ctx: &OutputContext) -> Result<Vec<u8>> {
    let spinner = if ctx.show_progress() {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.set_message(format!("Reading {}...", path.display()));
        pb.enable_steady_tick(Duration::from_millis(80));
        Some(pb)
    } else {
        None
    };

    let result =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()));
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let data = result?;
    tracing::debug!(path = %path.display(), size = data.len(), "Image loaded");
    Ok(data)
}

/// Parse hex bytes, ignoring whitespace, `:` separators and a `0x` prefix
pub fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    let digits: String = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&digits).with_context(|| format!("Invalid hex input: {input}"))
}

/// Parse a decimal or `0x`-prefixed hexadecimal number
pub fn parse_usize(s: &str) -> Result<usize, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

pub fn parse_u32(s: &str) -> Result<u32, String> {
    let value = parse_usize(s)?;
    u32::try_from(value).map_err(|_| format!("'{s}' does not fit in 32 bits"))
}
