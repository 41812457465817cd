//! Vendor A fixup checksum
//!
//! The bootloader sums every big-endian 32-bit word of the image and expects
//! the total to equal a fixed target. One word at a fixed offset is reserved
//! as the "fixup" that balances the sum after any edit.

use super::{read_u32_be, write_u32_be};
use crate::error::{check_aligned, check_location, CodecError, CodecResult};

/// Target the 32-bit word sum must reach
pub const DEFAULT_TARGET: u32 = 0x5AA5_5AA5;

/// Fixup location used by 1 MB images
pub const DEFAULT_OFFSET: usize = 0x0B_FFF0;

pub(crate) fn default_target() -> u32 {
    DEFAULT_TARGET
}

/// Fixup checksum parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixupChecksum {
    pub offset: usize,
    pub target: u32,
}

impl Default for FixupChecksum {
    fn default() -> Self {
        Self::new(DEFAULT_OFFSET, DEFAULT_TARGET)
    }
}

impl FixupChecksum {
    pub fn new(offset: usize, target: u32) -> Self {
        Self { offset, target }
    }

    fn check(&self, data: &[u8]) -> CodecResult<()> {
        check_aligned("fixup offset", self.offset, 4)?;
        if data.len() % 4 != 0 {
            return Err(CodecError::Misaligned {
                what: "image length",
                offset: data.len(),
                alignment: 4,
            });
        }
        check_location("fixup word", self.offset, 4, data.len())
    }

    /// Compute the fixup word for `data`, treating the stored fixup as zero
    pub fn compute(&self, data: &[u8]) -> CodecResult<u32> {
        self.check(data)?;
        let sum = (0..data.len())
            .step_by(4)
            .filter(|&off| off != self.offset)
            .fold(0u32, |acc, off| acc.wrapping_add(read_u32_be(data, off)));
        Ok(self.target.wrapping_sub(sum))
    }

    /// Compute and store the fixup word, returning it
    pub fn update(&self, data: &mut [u8]) -> CodecResult<u32> {
        let fixup = self.compute(data)?;
        write_u32_be(data, self.offset, fixup);
        Ok(fixup)
    }

    /// True iff the stored fixup word balances the image
    pub fn validate(&self, data: &[u8]) -> CodecResult<bool> {
        let expected = self.compute(data)?;
        Ok(read_u32_be(data, self.offset) == expected)
    }
}
