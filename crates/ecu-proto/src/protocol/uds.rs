//! UDS read/flash state machine
//!
//! Handshake: DiagnosticSessionControl, then SecurityAccess seed/key with the
//! injected [`KeyDerivation`]. Reads use ReadMemoryByAddress block by block.
//! Writes erase and program each selected sector with RoutineControl,
//! RequestDownload, TransferData and RequestTransferExit, then verify the
//! whole image and reset the ECU.

use std::sync::Arc;

use ecu_codec::checksum::crc::crc32;
use ecu_codec::telemetry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::{ProtocolConfig, WriteOptions};
use super::events::{EcuEventKind, EventPayload, EventSink, ProgressTracker, RomPhase};
use super::{obd, plan_write};
use crate::connection::Connection;
use crate::error::{ProtocolError, ProtocolResult};
use crate::live::PidDescriptor;
use crate::security::{KeyDerivation, LinearKey, XorFfKey};
use crate::uds::{routine_id, session_type, ServiceIds, UdsError, UdsService};

/// Which UDS dialect an ECU speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UdsVariant {
    /// ISO 14229 with an XOR-0xFF key fallback
    Generic,
    /// Mitsubishi CAN: extended session 0x92, linear key, RAX live data
    MitsuCan,
}

#[derive(Debug, Clone)]
pub struct UdsProtocol {
    variant: UdsVariant,
    config: ProtocolConfig,
    key: Arc<dyn KeyDerivation>,
    service_ids: ServiceIds,
}

impl UdsProtocol {
    pub fn new(variant: UdsVariant, config: ProtocolConfig, key: Arc<dyn KeyDerivation>) -> Self {
        Self {
            variant,
            config,
            key,
            service_ids: ServiceIds::default(),
        }
    }

    pub fn generic() -> Self {
        Self::new(
            UdsVariant::Generic,
            ProtocolConfig::generic_uds(),
            Arc::new(XorFfKey),
        )
    }

    pub fn mitsucan() -> Self {
        Self::new(
            UdsVariant::MitsuCan,
            ProtocolConfig::mitsucan(),
            Arc::new(LinearKey::MITSUCAN),
        )
    }

    pub fn with_config(mut self, config: ProtocolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_key(mut self, key: Arc<dyn KeyDerivation>) -> Self {
        self.key = key;
        self
    }

    pub fn with_service_ids(mut self, service_ids: ServiceIds) -> Self {
        self.service_ids = service_ids;
        self
    }

    pub fn name(&self) -> &'static str {
        match self.variant {
            UdsVariant::Generic => "generic_uds",
            UdsVariant::MitsuCan => "mitsucan",
        }
    }

    pub fn variant(&self) -> UdsVariant {
        self.variant
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn key_derivation(&self) -> &dyn KeyDerivation {
        self.key.as_ref()
    }

    fn service<'a>(&self, conn: &'a dyn Connection) -> UdsService<'a> {
        UdsService::with_service_ids(conn, self.service_ids)
    }

    /// Session type sent while probing; vendor ECUs only accept their own
    fn probe_session(&self) -> u8 {
        match self.variant {
            UdsVariant::Generic => session_type::DEFAULT,
            UdsVariant::MitsuCan => session_type::MITSUCAN_EXTENDED,
        }
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    fn deny(&self, events: &EventSink, level: u8, reason: String) {
        warn!(protocol = self.name(), level, %reason, "Security access denied");
        events.ecu(
            EcuEventKind::SecurityAccessDenied,
            Some(EventPayload::Message { text: reason }),
        );
    }

    /// Map a security access failure, reporting refusals as DENIED first
    fn security_failure(&self, events: &EventSink, level: u8, err: UdsError) -> ProtocolError {
        match err {
            UdsError::NegativeResponse { nrc, .. } if nrc.is_security_rejection() => {
                let reason = format!("{nrc} (0x{nrc:02X})");
                self.deny(events, level, reason.clone());
                ProtocolError::SecurityAccessDenied(reason)
            }
            // Refused for another reason (wrong session, conditions); the
            // handshake still failed but the NRC is kept as is
            UdsError::NegativeResponse { nrc, .. } => {
                self.deny(events, level, format!("{nrc} (0x{nrc:02X})"));
                err.into()
            }
            UdsError::UnexpectedResponse {
                expected, actual, ..
            } => {
                self.deny(
                    events,
                    level,
                    format!("expected 0x{expected:02X}, received 0x{actual:02X}"),
                );
                ProtocolError::UnexpectedByte {
                    step: "security access",
                    expected,
                    actual,
                }
            }
            other => other.into(),
        }
    }

    async fn handshake(&self, uds: &UdsService<'_>, events: &EventSink) -> ProtocolResult<()> {
        info!(
            protocol = self.name(),
            session = format_args!("0x{:02X}", self.config.session_type),
            "Opening diagnostic session"
        );
        uds.diagnostic_session_control(self.config.session_type)
            .await?;

        let level = self.config.security_level;
        events.ecu(
            EcuEventKind::SecurityAccessRequested,
            Some(EventPayload::Security { level }),
        );

        let seed = uds
            .security_access_request_seed(level)
            .await
            .map_err(|e| self.security_failure(events, level, e))?;

        if !seed.is_empty() && seed.iter().all(|&b| b == 0) {
            info!(level, "ECU already unlocked");
        } else {
            let key = match self.key.derive_key(&seed) {
                Ok(key) => key,
                Err(e) => {
                    self.deny(events, level, e.to_string());
                    return Err(e.into());
                }
            };
            debug!(
                algorithm = self.key.name(),
                seed = %hex::encode(&seed),
                key = %hex::encode(&key),
                "Sending security key"
            );
            uds.security_access_send_key(level, &key)
                .await
                .map_err(|e| self.security_failure(events, level, e))?;
        }

        events.ecu(
            EcuEventKind::SecurityAccessGranted,
            Some(EventPayload::Security { level }),
        );
        ProgressTracker::new(events, RomPhase::Negotiating, 0)
            .finish(Some(format!("security level {level} granted")));
        info!(protocol = self.name(), level, "Security access granted");
        Ok(())
    }

    // =========================================================================
    // Capability
    // =========================================================================

    pub async fn can_handle(&self, conn: &dyn Connection) -> bool {
        match self
            .service(conn)
            .diagnostic_session_control(self.probe_session())
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(protocol = self.name(), error = %e, "UDS probe failed");
                false
            }
        }
    }

    pub async fn read_rom(
        &self,
        conn: &dyn Connection,
        events: &EventSink,
    ) -> ProtocolResult<Vec<u8>> {
        self.config.validate()?;
        let uds = self.service(conn);
        self.handshake(&uds, events).await?;

        let mut rom = vec![0u8; self.config.rom_size];
        let mut progress = ProgressTracker::new(events, RomPhase::Reading, rom.len() as u64);
        let block_size = self.config.block_size;

        for (index, block) in rom.chunks_mut(block_size).enumerate() {
            let address = self
                .config
                .rom_start
                .wrapping_add((index * block_size) as u32);
            let data = uds
                .read_memory_by_address(address, block.len() as u16)
                .await
                .map_err(|e| {
                    warn!(address = format_args!("0x{address:08X}"), error = %e, "Block read failed");
                    ProtocolError::from(e)
                })?;
            if data.len() < block.len() {
                return Err(ProtocolError::ShortResponse {
                    step: "read memory",
                    expected: block.len(),
                    actual: data.len(),
                });
            }
            block.copy_from_slice(&data[..block.len()]);
            progress.advance(block.len() as u64, None);
        }

        info!(protocol = self.name(), bytes = rom.len(), "ROM read complete");
        Ok(rom)
    }

    pub async fn write_rom(
        &self,
        conn: &dyn Connection,
        rom: &[u8],
        options: &WriteOptions,
        events: &EventSink,
    ) -> ProtocolResult<()> {
        let sectors = plan_write(&self.config, rom, options)?;
        let uds = self.service(conn);
        self.handshake(&uds, events).await?;

        let total = (sectors.len() * self.config.sector_size) as u64;
        let mut progress = ProgressTracker::new(events, RomPhase::Writing, total);
        let mut erased = ProgressTracker::new(events, RomPhase::Erasing, total);

        if options.dry_run {
            info!(
                protocol = self.name(),
                sectors = sectors.len(),
                "Dry run, flash not modified"
            );
            progress.finish(Some("dry run: flash not modified".to_string()));
            return Ok(());
        }

        info!(protocol = self.name(), sectors = ?sectors, "Programming sectors");
        for &index in &sectors {
            let start = index * self.config.sector_size;
            let data = &rom[start..start + self.config.sector_size];
            self.program_sector(&uds, index, data, &mut erased, &mut progress, events)
                .await?;
        }

        let crc = crc32(rom);
        uds.routine_control_start(routine_id::VERIFY_MEMORY, &crc.to_be_bytes())
            .await?;
        ProgressTracker::new(events, RomPhase::Verifying, rom.len() as u64)
            .finish(Some(format!("CRC-32 0x{crc:08X}")));
        info!(crc = format_args!("0x{crc:08X}"), "Image verified");

        uds.hard_reset().await?;
        events.ecu(EcuEventKind::EcuResetting, None);
        Ok(())
    }

    async fn program_sector(
        &self,
        uds: &UdsService<'_>,
        index: usize,
        data: &[u8],
        erased: &mut ProgressTracker<'_>,
        progress: &mut ProgressTracker<'_>,
        events: &EventSink,
    ) -> ProtocolResult<()> {
        let address = self.config.sector_address(index);
        let sector = Some(EventPayload::Sector { index, address });

        events.ecu(EcuEventKind::SectorEraseStarted, sector.clone());
        let mut params = Vec::with_capacity(8);
        params.extend_from_slice(&address.to_be_bytes());
        params.extend_from_slice(&(data.len() as u32).to_be_bytes());
        uds.routine_control_start(routine_id::ERASE_MEMORY, &params)
            .await?;
        events.ecu(EcuEventKind::SectorEraseComplete, sector);
        erased.advance(data.len() as u64, None);
        debug!(sector = index, address = format_args!("0x{address:08X}"), "Sector erased");

        let max_block = uds.request_download(address, data.len() as u32).await? as usize;
        let chunk_len = match max_block {
            0 => self.config.block_size,
            max => self.config.block_size.min(max),
        };

        // Sequence counter restarts for every sector
        let mut counter: u8 = 1;
        for chunk in data.chunks(chunk_len) {
            uds.transfer_data(counter, chunk).await?;
            counter = counter.wrapping_add(1);
            progress.advance(chunk.len() as u64, None);
        }
        uds.request_transfer_exit().await?;

        info!(sector = index, address = format_args!("0x{address:08X}"), "Sector programmed");
        Ok(())
    }

    // =========================================================================
    // Live data
    // =========================================================================

    pub async fn get_supported_pids(
        &self,
        conn: &dyn Connection,
    ) -> ProtocolResult<Vec<PidDescriptor>> {
        match self.variant {
            UdsVariant::MitsuCan => Ok(PidDescriptor::all_rax()),
            UdsVariant::Generic => {
                let uds = self.service(conn);
                let pids = obd::walk_supported(|base| async move {
                    Ok(uds
                        .read_data_by_id(crate::live::OBD_DID_BASE | u16::from(base))
                        .await?)
                })
                .await?;
                Ok(pids.into_iter().map(PidDescriptor::uds_obd).collect())
            }
        }
    }

    pub fn resolve_pid(&self, pid: u32) -> ProtocolResult<PidDescriptor> {
        if self.variant == UdsVariant::MitsuCan && telemetry::is_synthetic_pid(pid) {
            let (block, index) = telemetry::resolve_pid(pid)?;
            return Ok(PidDescriptor::rax(block, index)?);
        }
        u8::try_from(pid)
            .ok()
            .filter(|pid| !obd::is_bitmap_pid(*pid))
            .map(PidDescriptor::uds_obd)
            .ok_or_else(|| {
                ProtocolError::InvalidArgument(format!("PID {pid} is not available on {}", self.name()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MockConnection;
    use crate::protocol::events::OperationEvent;
    use pretty_assertions::assert_eq;

    fn small_config() -> ProtocolConfig {
        ProtocolConfig {
            rom_size: 0x400,
            block_size: 0x100,
            sector_size: 0x200,
            ..ProtocolConfig::generic_uds()
        }
    }

    fn kinds(rx: &mut tokio::sync::mpsc::UnboundedReceiver<OperationEvent>) -> Vec<EcuEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Some(ecu) = event.as_ecu() {
                kinds.push(ecu.kind);
            }
        }
        kinds
    }

    #[tokio::test]
    async fn test_read_rom_blocks() {
        let conn = MockConnection::new(|req| match req[0] {
            0x10 => Ok(vec![0x50, req[1]]),
            0x27 if req[1] == 0x01 => Ok(vec![0x67, 0x01, 0x12, 0x34]),
            0x27 => {
                assert_eq!(&req[2..], &[0xED, 0xCB]);
                Ok(vec![0x67, 0x02])
            }
            0x23 => {
                let block = req[4];
                Ok(std::iter::once(0x63)
                    .chain(std::iter::repeat(block).take(0x100))
                    .collect())
            }
            _ => Ok(vec![0x7F, req[0], 0x11]),
        });
        let protocol = UdsProtocol::generic().with_config(small_config());
        let (events, mut rx) = EventSink::channel();

        let rom = protocol.read_rom(&conn, &events).await.unwrap();
        assert_eq!(rom.len(), 0x400);
        assert_eq!(rom[0x000], 0x00);
        assert_eq!(rom[0x1FF], 0x01);
        assert_eq!(rom[0x3FF], 0x03);
        assert_eq!(conn.count_requests(&[0x23]), 4);
        assert_eq!(
            kinds(&mut rx),
            vec![
                EcuEventKind::SecurityAccessRequested,
                EcuEventKind::SecurityAccessGranted
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_seed_skips_key() {
        let conn = MockConnection::with_responses(vec![
            (vec![0x10], vec![0x50, 0x02]),
            (vec![0x27, 0x01], vec![0x67, 0x01, 0x00, 0x00]),
            (vec![0x23], [vec![0x63], vec![0xAA; 0x100]].concat()),
        ]);
        let protocol = UdsProtocol::generic().with_config(small_config());
        protocol.read_rom(&conn, &EventSink::discard()).await.unwrap();
        assert_eq!(conn.count_requests(&[0x27, 0x02]), 0);
    }

    #[tokio::test]
    async fn test_unexpected_key_response_is_denied() {
        let conn = MockConnection::with_responses(vec![
            (vec![0x10], vec![0x50, 0x02]),
            (vec![0x27, 0x01], vec![0x67, 0x01, 0x12, 0x34]),
            (vec![0x27, 0x02], vec![0x51, 0x02]),
        ]);
        let protocol = UdsProtocol::generic().with_config(small_config());
        let (events, mut rx) = EventSink::channel();
        let err = protocol.read_rom(&conn, &events).await.unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnexpectedByte {
                step: "security access",
                expected: 0x67,
                actual: 0x51
            }
        );
        assert_eq!(
            kinds(&mut rx),
            vec![
                EcuEventKind::SecurityAccessRequested,
                EcuEventKind::SecurityAccessDenied
            ]
        );
    }

    #[tokio::test]
    async fn test_seed_refused_outside_security_keeps_nrc() {
        let conn = MockConnection::with_responses(vec![
            (vec![0x10], vec![0x50, 0x02]),
            (vec![0x27, 0x01], vec![0x7F, 0x27, 0x22]),
        ]);
        let protocol = UdsProtocol::generic().with_config(small_config());
        let (events, mut rx) = EventSink::channel();
        let err = protocol.read_rom(&conn, &events).await.unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Uds(UdsError::NegativeResponse {
                service_id: 0x27,
                nrc: crate::uds::NegativeResponseCode::ConditionsNotCorrect,
            })
        );
        assert_eq!(
            kinds(&mut rx),
            vec![
                EcuEventKind::SecurityAccessRequested,
                EcuEventKind::SecurityAccessDenied
            ]
        );
    }

    #[tokio::test]
    async fn test_mitsucan_linear_key_and_session() {
        let conn = MockConnection::with_responses(vec![
            (vec![0x10, 0x92], vec![0x50, 0x92]),
            (vec![0x27, 0x01], vec![0x67, 0x01, 0xBE, 0xEF]),
            (vec![0x27, 0x02, 0x08, 0xA3], vec![0x67, 0x02]),
        ]);
        let protocol = UdsProtocol::mitsucan();
        assert!(protocol.can_handle(&conn).await);

        let err = protocol
            .write_rom(&conn, &vec![0u8; 0x1000], &WriteOptions::default(), &EventSink::discard())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::RomSizeMismatch {
                expected: 0x100000,
                actual: 0x1000
            }
        );
        assert_eq!(conn.requests().len(), 1);

        let (events, _rx) = EventSink::channel();
        let dry_run = WriteOptions::dry_run();
        protocol
            .write_rom(&conn, &vec![0u8; 0x100000], &dry_run, &events)
            .await
            .unwrap();
        assert_eq!(conn.count_requests(&[0x27, 0x02, 0x08, 0xA3]), 1);
        assert_eq!(conn.count_requests(&[0x31]), 0);
    }

    #[test]
    fn test_pid_resolution() {
        let mitsu = UdsProtocol::mitsucan();
        let desc = mitsu.resolve_pid(10_000).unwrap();
        assert_eq!(desc.name, "rpm");
        assert_eq!(
            mitsu.resolve_pid(0x0C).unwrap().source,
            crate::live::PidSource::UdsDid(0xF40C)
        );
        assert!(UdsProtocol::generic().resolve_pid(10_000).is_err());
    }
}
