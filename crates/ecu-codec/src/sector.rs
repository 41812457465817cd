//! Changed-sector detection for incremental flashing

use crate::error::{CodecError, CodecResult};

/// Indices of the `sector_size`-byte sectors that differ between two images.
///
/// Both images must be the same length and that length must be a whole number
/// of sectors. Indices are returned in ascending order; identical images give
/// an empty list.
pub fn compute_changed_sectors(
    original: &[u8],
    modified: &[u8],
    sector_size: usize,
) -> CodecResult<Vec<usize>> {
    if original.len() != modified.len() {
        return Err(CodecError::SizeMismatch {
            expected: original.len(),
            actual: modified.len(),
        });
    }
    if sector_size == 0 || original.len() % sector_size != 0 {
        return Err(CodecError::Misaligned {
            what: "image length",
            offset: original.len(),
            alignment: sector_size,
        });
    }

    // `any` stops at the first differing byte of each sector
    Ok(original
        .chunks_exact(sector_size)
        .zip(modified.chunks_exact(sector_size))
        .enumerate()
        .filter(|(_, (a, b))| a.iter().zip(b.iter()).any(|(x, y)| x != y))
        .map(|(index, _)| index)
        .collect())
}
