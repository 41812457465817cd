//! Nissan-family ROM checksums
//!
//! STD/ALT stores a 32-bit word sum and a 32-bit word XOR of a region.
//! ALT2 adds a 16-bit calibration sum and a 16-bit code sum either side of a
//! calibration/code split point.

use serde::{Deserialize, Serialize};

use super::{read_u16_be, read_u32_be, write_u16_be, write_u32_be};
use crate::error::{check_location, check_region, CodecError, CodecResult};

/// Sum and XOR of the words in `[start, end)`, skipping the words at `skip`
fn sum_xor_words(data: &[u8], start: usize, end: usize, skip: &[usize]) -> (u32, u32) {
    (start..end)
        .step_by(4)
        .filter(|off| !skip.contains(off))
        .fold((0u32, 0u32), |(sum, xor), off| {
            let word = read_u32_be(data, off);
            (sum.wrapping_add(word), xor ^ word)
        })
}

/// STD/ALT checksum: word sum and word XOR stored at two locations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NissanStdAlt {
    pub start: usize,
    pub end: usize,
    pub sum_location: usize,
    pub xor_location: usize,
}

impl NissanStdAlt {
    pub fn new(start: usize, end: usize, sum_location: usize, xor_location: usize) -> Self {
        Self {
            start,
            end,
            sum_location,
            xor_location,
        }
    }

    fn check(&self, data: &[u8]) -> CodecResult<()> {
        check_region(self.start, self.end, data.len(), 4)?;
        check_location("sum location", self.sum_location, 4, data.len())?;
        check_location("xor location", self.xor_location, 4, data.len())
    }

    /// Compute `(sum, xor)` for the region
    pub fn compute(&self, data: &[u8]) -> CodecResult<(u32, u32)> {
        self.check(data)?;
        Ok(sum_xor_words(
            data,
            self.start,
            self.end,
            &[self.sum_location, self.xor_location],
        ))
    }

    /// Compute and store both values
    pub fn update(&self, data: &mut [u8]) -> CodecResult<(u32, u32)> {
        let (sum, xor) = self.compute(data)?;
        write_u32_be(data, self.sum_location, sum);
        write_u32_be(data, self.xor_location, xor);
        Ok((sum, xor))
    }

    /// Number of stored values (0-2) that match recomputation
    pub fn validate(&self, data: &[u8]) -> CodecResult<usize> {
        let (sum, xor) = self.compute(data)?;
        let matched = usize::from(read_u32_be(data, self.sum_location) == sum)
            + usize::from(read_u32_be(data, self.xor_location) == xor);
        Ok(matched)
    }
}

/// The four ALT2 checksum values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alt2Checksums {
    pub sum: u32,
    pub xor: u32,
    pub calibration: u16,
    pub code: u16,
}

/// ALT2 layout.
///
/// - `sum`/`xor`: words in `[start + 4, end)` excluding the sum, xor and split words
/// - calibration: 16-bit sum of halfwords in `[start + 2, split)`, with the sum
///   and xor storage words replaced by the freshly computed values
/// - code: 16-bit sum of halfwords in `[split + 4, end)`
///
/// The calibration sum is stored at `split`, the code sum at `split + 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alt2Layout {
    pub start: usize,
    pub end: usize,
    pub sum_location: usize,
    pub xor_location: usize,
    pub split: usize,
}

impl Alt2Layout {
    fn check(&self, data: &[u8]) -> CodecResult<()> {
        check_region(self.start, self.end, data.len(), 4)?;
        if self.start + 4 >= self.end {
            return Err(CodecError::EmptyRegion {
                start: self.start + 4,
                end: self.end,
            });
        }
        check_location("sum location", self.sum_location, 4, data.len())?;
        check_location("xor location", self.xor_location, 4, data.len())?;
        check_location("calibration split", self.split, 4, data.len())?;
        if self.split < self.start + 4 || self.split + 4 > self.end {
            return Err(CodecError::OutOfBounds {
                what: "calibration split",
                end: self.split + 4,
                len: self.end,
            });
        }
        Ok(())
    }

    fn calibration_sum(&self, data: &[u8], sum: u32, xor: u32) -> u16 {
        let mut total = 0u16;
        let mut off = self.start + 2;
        while off < self.split {
            let inlined = if off == self.sum_location {
                Some(sum)
            } else if off == self.xor_location {
                Some(xor)
            } else {
                None
            };
            match inlined {
                Some(word) => {
                    total = total
                        .wrapping_add((word >> 16) as u16)
                        .wrapping_add(word as u16);
                    off += 4;
                }
                None => {
                    total = total.wrapping_add(read_u16_be(data, off));
                    off += 2;
                }
            }
        }
        total
    }

    fn code_sum(&self, data: &[u8]) -> u16 {
        (self.split + 4..self.end)
            .step_by(2)
            .fold(0u16, |acc, off| acc.wrapping_add(read_u16_be(data, off)))
    }

    /// Compute all four values from `data` as it is stored
    pub fn compute(&self, data: &[u8]) -> CodecResult<Alt2Checksums> {
        self.check(data)?;
        let (sum, xor) = sum_xor_words(
            data,
            self.start + 4,
            self.end,
            &[self.sum_location, self.xor_location, self.split],
        );
        Ok(Alt2Checksums {
            sum,
            xor,
            calibration: self.calibration_sum(data, sum, xor),
            code: self.code_sum(data),
        })
    }

    /// Compute and store all four values.
    ///
    /// The code sum is taken after the sum and xor words are written, so it
    /// agrees with validation when those words fall inside the code region.
    pub fn update(&self, data: &mut [u8]) -> CodecResult<Alt2Checksums> {
        let mut values = self.compute(data)?;
        write_u32_be(data, self.sum_location, values.sum);
        write_u32_be(data, self.xor_location, values.xor);
        values.code = self.code_sum(data);
        write_u16_be(data, self.split, values.calibration);
        write_u16_be(data, self.split + 2, values.code);
        Ok(values)
    }

    /// Number of stored values (0-4) that match recomputation
    pub fn validate(&self, data: &[u8]) -> CodecResult<usize> {
        let values = self.compute(data)?;
        let matched = usize::from(read_u32_be(data, self.sum_location) == values.sum)
            + usize::from(read_u32_be(data, self.xor_location) == values.xor)
            + usize::from(read_u16_be(data, self.split) == values.calibration)
            + usize::from(read_u16_be(data, self.split + 2) == values.code);
        Ok(matched)
    }
}
