//! Diff command - sectors an incremental flash would program

use std::path::Path;

use anyhow::{Context, Result};
use ecu_codec::compute_changed_sectors;

use super::read_image;
use crate::output::{OutputContext, SectorRow};

/// Changed sectors with their flash address and number of differing bytes
pub fn changed_sectors(
    original: &[u8],
    modified: &[u8],
    sector_size: usize,
    rom_start: u32,
) -> Result<Vec<SectorRow>> {
    let sectors = compute_changed_sectors(original, modified, sector_size)
        .context("Images cannot be compared sector by sector")?;

    Ok(sectors
        .into_iter()
        .map(|index| {
            let range = index * sector_size..(index + 1) * sector_size;
            let changed_bytes = original[range.clone()]
                .iter()
                .zip(&modified[range])
                .filter(|(a, b)| a != b)
                .count();
            SectorRow {
                index,
                address: format!(
                    "0x{:08X}",
                    rom_start.wrapping_add((index * sector_size) as u32)
                ),
                changed_bytes,
            }
        })
        .collect())
}

pub fn diff(
    original_path: &Path,
    modified_path: &Path,
    sector_size: usize,
    rom_start: u32,
    ctx: &OutputContext,
) -> Result<()> {
    let original = read_image(original_path, ctx)?;
    let modified = read_image(modified_path, ctx)?;
    let rows = changed_sectors(&original, &modified, sector_size, rom_start)?;

    let total = original.len() / sector_size;
    ctx.print(&rows);
    ctx.info(&format!("{} of {} sectors changed", rows.len(), total));
    Ok(())
}
