//! Security access key derivation
//!
//! Every ECU family answers a seed request with a challenge and expects a key
//! computed by a vendor algorithm. Protocols hold the algorithm as an injected
//! [`KeyDerivation`] so a new ECU only needs a new strategy, not a new
//! protocol.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("invalid seed length: expected {expected} bytes, got {actual}")]
    InvalidSeedLength { expected: usize, actual: usize },

    #[error("invalid key mask: {0}")]
    InvalidMask(String),
}

/// Pure, deterministic `seed -> key` function
pub trait KeyDerivation: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn derive_key(&self, seed: &[u8]) -> Result<Vec<u8>, SecurityError>;
}

/// `key = seed * multiplier + addend (mod 2^16)` over a 2-byte big-endian seed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearKey {
    pub multiplier: u16,
    pub addend: u16,
}

impl LinearKey {
    pub const MITSUCAN: LinearKey = LinearKey {
        multiplier: 0x4081,
        addend: 0x1234,
    };
}

impl Default for LinearKey {
    fn default() -> Self {
        Self::MITSUCAN
    }
}

impl KeyDerivation for LinearKey {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn derive_key(&self, seed: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let seed: [u8; 2] = seed
            .try_into()
            .map_err(|_| SecurityError::InvalidSeedLength {
                expected: 2,
                actual: seed.len(),
            })?;
        let key = u16::from_be_bytes(seed)
            .wrapping_mul(self.multiplier)
            .wrapping_add(self.addend);
        Ok(key.to_be_bytes().to_vec())
    }
}

/// Invert every seed bit. Fallback for ECUs whose algorithm is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XorFfKey;

impl KeyDerivation for XorFfKey {
    fn name(&self) -> &'static str {
        "xor_ff"
    }

    fn derive_key(&self, seed: &[u8]) -> Result<Vec<u8>, SecurityError> {
        Ok(seed.iter().map(|b| b ^ 0xFF).collect())
    }
}

/// XOR the seed with a repeating secret mask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XorMaskKey {
    mask: Vec<u8>,
}

impl XorMaskKey {
    pub fn new(mask: Vec<u8>) -> Result<Self, SecurityError> {
        if mask.is_empty() {
            return Err(SecurityError::InvalidMask("mask is empty".to_string()));
        }
        Ok(Self { mask })
    }

    /// Parse a hex mask such as `"A5C3"`
    pub fn from_hex(mask: &str) -> Result<Self, SecurityError> {
        let bytes = hex::decode(mask).map_err(|e| SecurityError::InvalidMask(e.to_string()))?;
        Self::new(bytes)
    }
}

impl KeyDerivation for XorMaskKey {
    fn name(&self) -> &'static str {
        "xor_mask"
    }

    fn derive_key(&self, seed: &[u8]) -> Result<Vec<u8>, SecurityError> {
        Ok(seed
            .iter()
            .zip(self.mask.iter().cycle())
            .map(|(s, m)| s ^ m)
            .collect())
    }
}

/// Key algorithm selection as it appears in configuration
///
/// ```toml
/// [ecu.key]
/// algorithm = "linear"
/// multiplier = 0x4081
/// addend = 0x1234
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum KeyAlgorithm {
    Linear {
        #[serde(default = "default_multiplier")]
        multiplier: u16,
        #[serde(default = "default_addend")]
        addend: u16,
    },
    XorFf,
    XorMask {
        mask: String,
    },
}

fn default_multiplier() -> u16 {
    LinearKey::MITSUCAN.multiplier
}

fn default_addend() -> u16 {
    LinearKey::MITSUCAN.addend
}

impl KeyAlgorithm {
    pub fn build(&self) -> Result<Arc<dyn KeyDerivation>, SecurityError> {
        Ok(match self {
            KeyAlgorithm::Linear { multiplier, addend } => Arc::new(LinearKey {
                multiplier: *multiplier,
                addend: *addend,
            }),
            KeyAlgorithm::XorFf => Arc::new(XorFfKey),
            KeyAlgorithm::XorMask { mask } => Arc::new(XorMaskKey::from_hex(mask)?),
        })
    }
}
