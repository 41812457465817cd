//! Checksum and CRC algorithms
//!
//! Every function here is pure and must agree bit-for-bit with values computed
//! by ECU bootloader firmware. Malformed regions are rejected with a
//! [`CodecError`] before any computation or buffer mutation; a stored checksum
//! that simply does not match is reported as data.
//!
//! | Module | Algorithms |
//! |--------|------------|
//! | [`crc`] | CRC-32 (IEEE), NCS CRC-16 (no final XOR) |
//! | [`simple`] | 8-bit sum, 8-bit XOR, K-line packet checksum |
//! | [`fixup`] | Vendor A 32-bit fixup word |
//! | [`table`] | Vendor B table-driven region checksums |
//! | [`nissan`] | Nissan STD/ALT and ALT2 |

pub mod crc;
pub mod fixup;
pub mod nissan;
pub mod simple;
pub mod table;

use serde::{Deserialize, Serialize};

use crate::error::CodecResult;

pub use fixup::FixupChecksum;
pub use nissan::{Alt2Layout, NissanStdAlt};
pub use table::{ChecksumTable, TableEntry, TableStatus};

/// Read the big-endian u32 at `offset`. Caller guarantees bounds.
#[inline]
pub(crate) fn read_u32_be(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Read the big-endian u16 at `offset`. Caller guarantees bounds.
#[inline]
pub(crate) fn read_u16_be(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

#[inline]
pub(crate) fn write_u32_be(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

#[inline]
pub(crate) fn write_u16_be(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// Outcome of validating a ROM-level checksum scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumReport {
    /// Number of stored checksums that match recomputation
    pub matched: usize,
    /// Number of stored checksums checked
    pub total: usize,
}

impl ChecksumReport {
    /// True when there was something to check and all of it matched
    pub fn is_valid(&self) -> bool {
        self.total > 0 && self.matched == self.total
    }
}

/// A ROM checksum scheme, selected per ECU family in configuration
///
/// ```toml
/// [protocol.checksum]
/// type = "fixup"
/// offset = 0x0BFFF0
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChecksumScheme {
    /// Vendor A whole-image fixup word
    Fixup {
        offset: usize,
        #[serde(default = "fixup::default_target")]
        target: u32,
    },
    /// Vendor B checksum table of 12-byte records
    Table {
        offset: usize,
        entries: usize,
        #[serde(default = "table::default_target")]
        target: u32,
    },
    /// Nissan sum/XOR pair
    NissanStdAlt {
        start: usize,
        end: usize,
        sum_location: usize,
        xor_location: usize,
    },
    /// Nissan sum/XOR plus calibration and code 16-bit sums
    NissanAlt2(Alt2Layout),
}

impl ChecksumScheme {
    /// Short name for logs and CLI output
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumScheme::Fixup { .. } => "fixup",
            ChecksumScheme::Table { .. } => "table",
            ChecksumScheme::NissanStdAlt { .. } => "nissan_std_alt",
            ChecksumScheme::NissanAlt2(_) => "nissan_alt2",
        }
    }

    /// Validate the stored checksums in `rom`
    pub fn validate(&self, rom: &[u8]) -> CodecResult<ChecksumReport> {
        match self {
            ChecksumScheme::Fixup { offset, target } => {
                let ok = FixupChecksum::new(*offset, *target).validate(rom)?;
                Ok(ChecksumReport {
                    matched: usize::from(ok),
                    total: 1,
                })
            }
            ChecksumScheme::Table {
                offset,
                entries,
                target,
            } => {
                let table = ChecksumTable::new(*offset, *entries, *target);
                let active = table.active_entries(rom)?;
                match table.validate(rom)? {
                    TableStatus::NoActiveEntries => Ok(ChecksumReport {
                        matched: 0,
                        total: 0,
                    }),
                    TableStatus::Checked { mismatched } => Ok(ChecksumReport {
                        matched: active - mismatched,
                        total: active,
                    }),
                }
            }
            ChecksumScheme::NissanStdAlt {
                start,
                end,
                sum_location,
                xor_location,
            } => {
                let matched =
                    NissanStdAlt::new(*start, *end, *sum_location, *xor_location).validate(rom)?;
                Ok(ChecksumReport { matched, total: 2 })
            }
            ChecksumScheme::NissanAlt2(layout) => {
                let matched = layout.validate(rom)?;
                Ok(ChecksumReport { matched, total: 4 })
            }
        }
    }

    /// Recompute and store every checksum of this scheme in `rom`
    pub fn update(&self, rom: &mut [u8]) -> CodecResult<()> {
        match self {
            ChecksumScheme::Fixup { offset, target } => {
                FixupChecksum::new(*offset, *target).update(rom)?;
            }
            ChecksumScheme::Table {
                offset,
                entries,
                target,
            } => {
                ChecksumTable::new(*offset, *entries, *target).update(rom)?;
            }
            ChecksumScheme::NissanStdAlt {
                start,
                end,
                sum_location,
                xor_location,
            } => {
                NissanStdAlt::new(*start, *end, *sum_location, *xor_location).update(rom)?;
            }
            ChecksumScheme::NissanAlt2(layout) => {
                layout.update(rom)?;
            }
        }
        Ok(())
    }
}
