//! Vendor B table-driven region checksums
//!
//! The ROM carries a table of fixed 12-byte big-endian records:
//!
//! ```text
//! +0  start address (u32)
//! +4  end address   (u32, exclusive)
//! +8  checksum      (u32) = target - sum(words in [start, end))
//! ```
//!
//! A record with `start == end == 0` and `checksum == target` is a disabled
//! slot. Disabled slots are skipped by both update and validation.

use serde::{Deserialize, Serialize};

use super::{read_u32_be, write_u32_be};
use crate::error::{check_aligned, check_region, CodecError, CodecResult};

/// Target the region word sum plus checksum must reach
pub const DEFAULT_TARGET: u32 = 0x5AA5_A55A;

/// Size of one table record in bytes
pub const ENTRY_SIZE: usize = 12;

pub(crate) fn default_target() -> u32 {
    DEFAULT_TARGET
}

/// Checksum of an arbitrary word-aligned region: `target - sum(words)`
pub fn region_checksum(data: &[u8], start: usize, end: usize, target: u32) -> CodecResult<u32> {
    check_region(start, end, data.len(), 4)?;
    let sum = (start..end)
        .step_by(4)
        .fold(0u32, |acc, off| acc.wrapping_add(read_u32_be(data, off)));
    Ok(target.wrapping_sub(sum))
}

/// One decoded table record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub start: u32,
    pub end: u32,
    pub checksum: u32,
}

impl TableEntry {
    pub fn from_bytes(record: &[u8]) -> Self {
        Self {
            start: read_u32_be(record, 0),
            end: read_u32_be(record, 4),
            checksum: read_u32_be(record, 8),
        }
    }

    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut out = [0u8; ENTRY_SIZE];
        out[0..4].copy_from_slice(&self.start.to_be_bytes());
        out[4..8].copy_from_slice(&self.end.to_be_bytes());
        out[8..12].copy_from_slice(&self.checksum.to_be_bytes());
        out
    }

    /// The sentinel record for a disabled slot
    pub fn disabled(target: u32) -> Self {
        Self {
            start: 0,
            end: 0,
            checksum: target,
        }
    }

    pub fn is_disabled(&self, target: u32) -> bool {
        self.start == 0 && self.end == 0 && self.checksum == target
    }
}

/// Result of validating a checksum table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableStatus {
    /// Every slot is disabled: there was nothing to check
    NoActiveEntries,
    /// At least one slot was checked
    Checked { mismatched: usize },
}

impl TableStatus {
    /// Legacy integer form: mismatch count, or -1 when nothing was checked
    pub fn as_count(&self) -> i64 {
        match self {
            TableStatus::NoActiveEntries => -1,
            TableStatus::Checked { mismatched } => *mismatched as i64,
        }
    }
}

/// A checksum table located in a ROM image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumTable {
    pub offset: usize,
    pub entries: usize,
    pub target: u32,
}

impl ChecksumTable {
    pub fn new(offset: usize, entries: usize, target: u32) -> Self {
        Self {
            offset,
            entries,
            target,
        }
    }

    /// Decode every record, checking the table fits in `data`
    pub fn read_entries(&self, data: &[u8]) -> CodecResult<Vec<TableEntry>> {
        check_aligned("table offset", self.offset, 4)?;
        let end = self
            .entries
            .checked_mul(ENTRY_SIZE)
            .and_then(|size| size.checked_add(self.offset))
            .unwrap_or(usize::MAX);
        if end > data.len() {
            return Err(CodecError::OutOfBounds {
                what: "checksum table",
                end,
                len: data.len(),
            });
        }
        Ok(data[self.offset..end]
            .chunks_exact(ENTRY_SIZE)
            .map(TableEntry::from_bytes)
            .collect())
    }

    /// Active records paired with their slot index, with regions checked
    fn active(&self, data: &[u8]) -> CodecResult<Vec<(usize, TableEntry)>> {
        let mut active = Vec::new();
        for (index, entry) in self.read_entries(data)?.into_iter().enumerate() {
            if entry.is_disabled(self.target) {
                continue;
            }
            check_region(entry.start as usize, entry.end as usize, data.len(), 4)?;
            active.push((index, entry));
        }
        Ok(active)
    }

    /// Number of non-disabled records
    pub fn active_entries(&self, data: &[u8]) -> CodecResult<usize> {
        Ok(self.active(data)?.len())
    }

    /// Recompute every active record's checksum in place.
    ///
    /// All records are checked before the first write, so a malformed record
    /// leaves `data` untouched. Returns the number of records written.
    pub fn update(&self, data: &mut [u8]) -> CodecResult<usize> {
        let active = self.active(data)?;
        for (index, entry) in &active {
            let checksum =
                region_checksum(data, entry.start as usize, entry.end as usize, self.target)?;
            write_u32_be(data, self.offset + index * ENTRY_SIZE + 8, checksum);
        }
        Ok(active.len())
    }

    /// Count records whose stored checksum does not match recomputation
    pub fn validate(&self, data: &[u8]) -> CodecResult<TableStatus> {
        let active = self.active(data)?;
        if active.is_empty() {
            return Ok(TableStatus::NoActiveEntries);
        }
        let mut mismatched = 0;
        for (_, entry) in &active {
            let expected =
                region_checksum(data, entry.start as usize, entry.end as usize, self.target)?;
            if expected != entry.checksum {
                mismatched += 1;
            }
        }
        Ok(TableStatus::Checked { mismatched })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TABLE: usize = 0x100;

    fn rom_with_table(entries: &[TableEntry]) -> Vec<u8> {
        let mut rom: Vec<u8> = (0..0x200u32).map(|i| (i ^ 0x5A) as u8).collect();
        for (i, entry) in entries.iter().enumerate() {
            let off = TABLE + i * ENTRY_SIZE;
            rom[off..off + ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        }
        rom
    }

    fn entry(start: u32, end: u32) -> TableEntry {
        TableEntry {
            start,
            end,
            checksum: 0,
        }
    }

    #[test]
    fn test_region_checksum_of_zeros_is_target() {
        assert_eq!(
            region_checksum(&[0u8; 32], 0, 32, DEFAULT_TARGET).unwrap(),
            DEFAULT_TARGET
        );
    }

    #[test]
    fn test_region_checksum_rejects_bad_regions() {
        let data = [0u8; 32];
        assert!(matches!(
            region_checksum(&data, 2, 16, DEFAULT_TARGET),
            Err(CodecError::Misaligned { .. })
        ));
        assert!(matches!(
            region_checksum(&data, 16, 16, DEFAULT_TARGET),
            Err(CodecError::EmptyRegion { .. })
        ));
        assert!(matches!(
            region_checksum(&data, 0, 64, DEFAULT_TARGET),
            Err(CodecError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_update_then_validate() {
        let mut rom = rom_with_table(&[
            entry(0x000, 0x080),
            TableEntry::disabled(DEFAULT_TARGET),
            entry(0x080, 0x100),
        ]);
        let table = ChecksumTable::new(TABLE, 3, DEFAULT_TARGET);

        assert_eq!(table.validate(&rom).unwrap(), TableStatus::Checked { mismatched: 2 });
        assert_eq!(table.update(&mut rom).unwrap(), 2);
        assert_eq!(table.validate(&rom).unwrap(), TableStatus::Checked { mismatched: 0 });

        // disabled slot untouched
        let slot = &rom[TABLE + ENTRY_SIZE..TABLE + 2 * ENTRY_SIZE];
        assert_eq!(slot, &TableEntry::disabled(DEFAULT_TARGET).to_bytes());
    }

    #[test]
    fn test_edit_is_detected() {
        let mut rom = rom_with_table(&[entry(0x000, 0x080), entry(0x080, 0x100)]);
        let table = ChecksumTable::new(TABLE, 2, DEFAULT_TARGET);
        table.update(&mut rom).unwrap();
        rom[0x90] ^= 0x01;
        assert_eq!(table.validate(&rom).unwrap(), TableStatus::Checked { mismatched: 1 });
    }

    #[test]
    fn test_all_disabled_is_distinguished() {
        let disabled = TableEntry::disabled(DEFAULT_TARGET);
        let mut rom = rom_with_table(&[disabled, disabled]);
        let table = ChecksumTable::new(TABLE, 2, DEFAULT_TARGET);

        let status = table.validate(&rom).unwrap();
        assert_eq!(status, TableStatus::NoActiveEntries);
        assert_eq!(status.as_count(), -1);
        assert_eq!(table.update(&mut rom).unwrap(), 0);
    }

    #[test]
    fn test_malformed_entry_leaves_rom_untouched() {
        let mut rom = rom_with_table(&[entry(0x000, 0x080), entry(0x080, 0x082)]);
        let before = rom.clone();
        let table = ChecksumTable::new(TABLE, 2, DEFAULT_TARGET);
        assert!(matches!(
            table.update(&mut rom),
            Err(CodecError::Misaligned { .. })
        ));
        assert_eq!(rom, before);
    }

    #[test]
    fn test_table_past_end_of_rom() {
        let rom = vec![0u8; 0x110];
        let table = ChecksumTable::new(TABLE, 4, DEFAULT_TARGET);
        assert!(matches!(
            table.validate(&rom),
            Err(CodecError::OutOfBounds { what: "checksum table", .. })
        ));
    }

    #[test]
    fn test_huge_table_geometry_does_not_overflow() {
        let rom = vec![0u8; 0x200];
        for table in [
            ChecksumTable::new(TABLE, usize::MAX / 4, DEFAULT_TARGET),
            ChecksumTable::new(usize::MAX - 3, 1, DEFAULT_TARGET),
        ] {
            assert_eq!(
                table.read_entries(&rom),
                Err(CodecError::OutOfBounds {
                    what: "checksum table",
                    end: usize::MAX,
                    len: rom.len(),
                })
            );
        }
    }
}
