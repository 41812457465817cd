//! ECU protocol state machines
//!
//! [`Protocol`] is a closed set of variants selected by probing:
//!
//! | Variant | Session / auth | ROM access | Live data |
//! |---------|----------------|------------|-----------|
//! | [`UdsProtocol`] (generic) | 0x10 + 0x27, XOR-0xFF key | 0x23 / 0x31, 0x34-0x37 | OBD DIDs 0xF4xx |
//! | [`UdsProtocol`] (MitsuCAN) | 0x10 0x92 + 0x27, linear key | same | RAX blocks |
//! | [`BootloaderProtocol`] | break, sync, mode challenge | kernel commands | - |
//! | [`ObdProtocol`] | none | - | mode 01 |

pub mod bootloader;
pub mod config;
pub mod events;
pub mod obd;
pub mod uds;

pub use bootloader::{BootMode, BootloaderProtocol};
pub use config::{ProtocolConfig, WriteOptions};
pub use events::{
    EcuEvent, EcuEventKind, EventPayload, EventSink, OperationEvent, ProgressTracker, RomPhase,
    RomProgress,
};
pub use obd::{ObdFormula, ObdProtocol};
pub use uds::{UdsProtocol, UdsVariant};

use std::sync::Arc;
use std::time::Duration;

use ecu_codec::compute_changed_sectors;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::{ProtocolError, ProtocolResult};
use crate::live::{LiveStream, PidDescriptor};

/// Checks every write performs before the first byte goes on the bus.
///
/// Returns the sector indices to program.
pub(crate) fn plan_write(
    config: &ProtocolConfig,
    rom: &[u8],
    options: &WriteOptions,
) -> ProtocolResult<Vec<usize>> {
    config.validate()?;
    if rom.len() != config.rom_size {
        return Err(ProtocolError::RomSizeMismatch {
            expected: config.rom_size,
            actual: rom.len(),
        });
    }

    if options.verify_checksums {
        let scheme = config.checksum.as_ref().ok_or_else(|| {
            ProtocolError::InvalidConfig(
                "checksum verification requested but no checksum scheme is configured".to_string(),
            )
        })?;
        let report = scheme.validate(rom)?;
        if !report.is_valid() {
            return Err(ProtocolError::ChecksumMismatch {
                scheme: scheme.name(),
                matched: report.matched,
                total: report.total,
            });
        }
        debug!(scheme = scheme.name(), "ROM checksums valid");
    }

    match &options.original_rom {
        Some(original) => {
            if original.len() != rom.len() {
                return Err(ProtocolError::RomSizeMismatch {
                    expected: rom.len(),
                    actual: original.len(),
                });
            }
            Ok(compute_changed_sectors(original, rom, config.sector_size)?)
        }
        None => Ok((0..config.sector_count()).collect()),
    }
}

#[derive(Debug, Clone)]
pub enum Protocol {
    Uds(UdsProtocol),
    Bootloader(BootloaderProtocol),
    Obd(ObdProtocol),
}

impl From<UdsProtocol> for Protocol {
    fn from(protocol: UdsProtocol) -> Self {
        Protocol::Uds(protocol)
    }
}

impl From<BootloaderProtocol> for Protocol {
    fn from(protocol: BootloaderProtocol) -> Self {
        Protocol::Bootloader(protocol)
    }
}

impl From<ObdProtocol> for Protocol {
    fn from(protocol: ObdProtocol) -> Self {
        Protocol::Obd(protocol)
    }
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Uds(p) => p.name(),
            Protocol::Bootloader(p) => p.name(),
            Protocol::Obd(p) => p.name(),
        }
    }

    /// ROM layout, for variants that can read and write flash
    pub fn config(&self) -> Option<&ProtocolConfig> {
        match self {
            Protocol::Uds(p) => Some(p.config()),
            Protocol::Bootloader(p) => Some(p.config()),
            Protocol::Obd(_) => None,
        }
    }

    /// Probe order: vendor dialects before generic ones
    pub fn default_candidates() -> Vec<Protocol> {
        vec![
            UdsProtocol::mitsucan().into(),
            UdsProtocol::generic().into(),
            BootloaderProtocol::default().into(),
            ObdProtocol.into(),
        ]
    }

    pub async fn can_handle(&self, conn: &dyn Connection) -> bool {
        match self {
            Protocol::Uds(p) => p.can_handle(conn).await,
            Protocol::Bootloader(p) => p.can_handle(conn).await,
            Protocol::Obd(p) => p.can_handle(conn).await,
        }
    }

    /// First candidate whose capability check succeeds
    pub async fn probe(conn: &dyn Connection, candidates: Vec<Protocol>) -> Option<Protocol> {
        for candidate in candidates {
            if candidate.can_handle(conn).await {
                info!(protocol = candidate.name(), "Protocol detected");
                return Some(candidate);
            }
            debug!(protocol = candidate.name(), "Protocol did not answer probe");
        }
        None
    }

    pub async fn read_rom(
        &self,
        conn: &dyn Connection,
        events: &EventSink,
    ) -> ProtocolResult<Vec<u8>> {
        match self {
            Protocol::Uds(p) => p.read_rom(conn, events).await,
            Protocol::Bootloader(p) => p.read_rom(conn, events).await,
            Protocol::Obd(p) => Err(ProtocolError::Unsupported {
                protocol: p.name(),
                operation: "ROM read",
            }),
        }
    }

    pub async fn write_rom(
        &self,
        conn: &dyn Connection,
        rom: &[u8],
        options: &WriteOptions,
        events: &EventSink,
    ) -> ProtocolResult<()> {
        match self {
            Protocol::Uds(p) => p.write_rom(conn, rom, options, events).await,
            Protocol::Bootloader(p) => p.write_rom(conn, rom, options, events).await,
            Protocol::Obd(p) => Err(ProtocolError::Unsupported {
                protocol: p.name(),
                operation: "ROM write",
            }),
        }
    }

    pub async fn get_supported_pids(
        &self,
        conn: &dyn Connection,
    ) -> ProtocolResult<Vec<PidDescriptor>> {
        match self {
            Protocol::Uds(p) => p.get_supported_pids(conn).await,
            Protocol::Obd(p) => p.get_supported_pids(conn).await,
            Protocol::Bootloader(p) => Err(ProtocolError::Unsupported {
                protocol: p.name(),
                operation: "live data",
            }),
        }
    }

    pub fn resolve_pid(&self, pid: u32) -> ProtocolResult<PidDescriptor> {
        match self {
            Protocol::Uds(p) => p.resolve_pid(pid),
            Protocol::Obd(p) => p.resolve_pid(pid),
            Protocol::Bootloader(p) => Err(ProtocolError::Unsupported {
                protocol: p.name(),
                operation: "live data",
            }),
        }
    }

    /// Start polling `pids` round-robin with `poll_delay` between requests
    pub fn stream_live_data(
        &self,
        conn: Arc<dyn Connection>,
        pids: &[u32],
        poll_delay: Duration,
    ) -> ProtocolResult<LiveStream> {
        if pids.is_empty() {
            return Err(ProtocolError::InvalidArgument(
                "no PIDs to stream".to_string(),
            ));
        }
        let descriptors = pids
            .iter()
            .map(|&pid| self.resolve_pid(pid))
            .collect::<ProtocolResult<Vec<_>>>()?;
        Ok(LiveStream::spawn(conn, descriptors, poll_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MockConnection;
    use pretty_assertions::assert_eq;

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            rom_size: 0x800,
            block_size: 0x100,
            sector_size: 0x200,
            ..ProtocolConfig::generic_uds()
        }
    }

    #[test]
    fn test_plan_write_defaults_to_every_sector() {
        let rom = vec![0u8; 0x800];
        assert_eq!(
            plan_write(&config(), &rom, &WriteOptions::default()).unwrap(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn test_plan_write_diffs_against_original() {
        let original = vec![0u8; 0x800];
        let mut rom = original.clone();
        rom[0x5FF] = 0xFF;
        assert_eq!(
            plan_write(&config(), &rom, &WriteOptions::incremental(original)).unwrap(),
            vec![2]
        );
        assert_eq!(
            plan_write(&config(), &rom, &WriteOptions::incremental(vec![0u8; 0x400])),
            Err(ProtocolError::RomSizeMismatch {
                expected: 0x800,
                actual: 0x400
            })
        );
    }

    #[test]
    fn test_plan_write_verifies_checksums() {
        let options = WriteOptions {
            verify_checksums: true,
            ..WriteOptions::default()
        };
        let rom = vec![0u8; 0x800];
        assert!(matches!(
            plan_write(&config(), &rom, &options),
            Err(ProtocolError::InvalidConfig(_))
        ));

        let config = ProtocolConfig {
            checksum: Some(ecu_codec::ChecksumScheme::Fixup {
                offset: 0x7F0,
                target: 0x5AA5_5AA5,
            }),
            ..config()
        };
        assert_eq!(
            plan_write(&config, &rom, &options),
            Err(ProtocolError::ChecksumMismatch {
                scheme: "fixup",
                matched: 0,
                total: 1
            })
        );

        let mut fixed = rom.clone();
        config
            .checksum
            .as_ref()
            .unwrap()
            .update(&mut fixed)
            .unwrap();
        assert_eq!(plan_write(&config, &fixed, &options).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_probe_picks_first_answering_candidate() {
        let conn = MockConnection::with_responses(vec![
            (vec![0x10, 0x92], vec![0x7F, 0x10, 0x12]),
            (vec![0x10, 0x01], vec![0x50, 0x01]),
        ]);
        let found = Protocol::probe(&conn, Protocol::default_candidates())
            .await
            .unwrap();
        assert_eq!(found.name(), "generic_uds");
    }

    #[tokio::test]
    async fn test_obd_has_no_rom_access() {
        let conn = MockConnection::new(|_| Ok(vec![]));
        let obd = Protocol::from(ObdProtocol);
        assert!(obd.config().is_none());
        assert_eq!(
            obd.read_rom(&conn, &EventSink::discard()).await,
            Err(ProtocolError::Unsupported {
                protocol: "obd2",
                operation: "ROM read"
            })
        );
        assert!(conn.requests().is_empty());
    }

    #[tokio::test]
    async fn test_stream_rejects_unknown_pids_up_front() {
        let conn: Arc<dyn Connection> = Arc::new(MockConnection::new(|_| Ok(vec![])));
        let obd = Protocol::from(ObdProtocol);
        assert!(obd.stream_live_data(conn.clone(), &[], Duration::ZERO).is_err());
        assert!(obd
            .stream_live_data(conn, &[0x0C, 10_000], Duration::ZERO)
            .is_err());
    }
}
