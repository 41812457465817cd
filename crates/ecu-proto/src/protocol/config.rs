//! Per-ECU-family protocol constants

use ecu_codec::checksum::fixup;
use ecu_codec::ChecksumScheme;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::uds::session_type;

/// Memory layout and session constants of one ECU family
///
/// ```toml
/// [protocol]
/// rom_start = 0x0
/// rom_size = 0x100000
/// block_size = 0x400
/// sector_size = 0x10000
/// session_type = 0x92
/// security_level = 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Address of the first ROM byte
    #[serde(default)]
    pub rom_start: u32,

    /// Fixed image length in bytes
    #[serde(default = "default_rom_size")]
    pub rom_size: usize,

    /// Bytes per read or transfer request
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Flash erase unit
    #[serde(default = "default_sector_size")]
    pub sector_size: usize,

    /// DiagnosticSessionControl session type
    #[serde(default = "default_session_type")]
    pub session_type: u8,

    #[serde(default = "default_security_level")]
    pub security_level: u8,

    /// ROM checksum scheme checked before writing
    #[serde(default)]
    pub checksum: Option<ChecksumScheme>,
}

fn default_rom_size() -> usize {
    512 * 1024
}

fn default_block_size() -> usize {
    0x400
}

fn default_sector_size() -> usize {
    0x10000
}

fn default_session_type() -> u8 {
    session_type::PROGRAMMING
}

fn default_security_level() -> u8 {
    1
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::generic_uds()
    }
}

impl ProtocolConfig {
    /// Generic UDS ECU with a 512 KB flash
    pub fn generic_uds() -> Self {
        Self {
            rom_start: 0,
            rom_size: default_rom_size(),
            block_size: default_block_size(),
            sector_size: default_sector_size(),
            session_type: default_session_type(),
            security_level: default_security_level(),
            checksum: None,
        }
    }

    /// Mitsubishi CAN ECU: 1 MB flash guarded by the vendor A fixup word
    pub fn mitsucan() -> Self {
        Self {
            rom_size: 1024 * 1024,
            session_type: session_type::MITSUCAN_EXTENDED,
            checksum: Some(ChecksumScheme::Fixup {
                offset: fixup::DEFAULT_OFFSET,
                target: fixup::DEFAULT_TARGET,
            }),
            ..Self::generic_uds()
        }
    }

    /// Denso-style K-line bootloader kernel
    pub fn bootloader() -> Self {
        Self {
            block_size: 0x80,
            ..Self::generic_uds()
        }
    }

    pub fn sector_count(&self) -> usize {
        if self.sector_size == 0 {
            0
        } else {
            self.rom_size / self.sector_size
        }
    }

    /// Address of sector `index`
    pub fn sector_address(&self, index: usize) -> u32 {
        self.rom_start.wrapping_add((index * self.sector_size) as u32)
    }

    /// Check that blocks tile sectors and sectors tile the ROM
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.rom_size == 0 || self.block_size == 0 || self.sector_size == 0 {
            return Err(ProtocolError::InvalidConfig(
                "rom_size, block_size and sector_size must be non-zero".to_string(),
            ));
        }
        if self.rom_size % self.sector_size != 0 {
            return Err(ProtocolError::InvalidConfig(format!(
                "rom_size 0x{:X} is not a multiple of sector_size 0x{:X}",
                self.rom_size, self.sector_size
            )));
        }
        if self.sector_size % self.block_size != 0 {
            return Err(ProtocolError::InvalidConfig(format!(
                "sector_size 0x{:X} is not a multiple of block_size 0x{:X}",
                self.sector_size, self.block_size
            )));
        }
        if self.block_size > usize::from(u16::MAX) {
            return Err(ProtocolError::InvalidConfig(format!(
                "block_size 0x{:X} does not fit a 2-byte read length",
                self.block_size
            )));
        }
        if u64::from(self.rom_start) + self.rom_size as u64 > u64::from(u32::MAX) + 1 {
            return Err(ProtocolError::InvalidConfig(
                "ROM extends past the 32-bit address space".to_string(),
            ));
        }
        if self.security_level == 0 || self.security_level > 0x7F {
            return Err(ProtocolError::InvalidConfig(format!(
                "security_level {} out of range 1..=127",
                self.security_level
            )));
        }
        Ok(())
    }
}

/// Options for [`crate::Protocol::write_rom`]
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Authenticate, then stop before touching flash
    pub dry_run: bool,

    /// Refuse to write unless the image's checksums validate
    pub verify_checksums: bool,

    /// Image currently in the ECU; only sectors that differ are programmed
    pub original_rom: Option<Vec<u8>>,
}

impl WriteOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn incremental(original_rom: Vec<u8>) -> Self {
        Self {
            original_rom: Some(original_rom),
            ..Self::default()
        }
    }
}
