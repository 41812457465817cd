//! Denso-style K-line bootloader kernel
//!
//! Entry sequence: line break, baud switch, sync pair, then a 6-byte mode
//! challenge answered by a single kernel-init byte. Every packet in either
//! direction ends with the simple packet checksum.
//!
//! Command packets (`[cmd][args...][sum]`) are acknowledged with
//! `[cmd ^ 0x40][data...][sum]` or refused with `[0x7F][cmd][code][sum]`.

use std::time::Duration;

use ecu_codec::checksum::crc::crc32;
use ecu_codec::checksum::simple::{seal_packet, verify_packet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::{ProtocolConfig, WriteOptions};
use super::events::{EcuEventKind, EventPayload, EventSink, ProgressTracker, RomPhase};
use super::plan_write;
use crate::connection::Connection;
use crate::error::{ProtocolError, ProtocolResult};

/// Line break that drops a running ECU into its bootloader
pub const BREAK_DURATION: Duration = Duration::from_millis(25);

/// Kernel baud rate after the break
pub const BOOT_BAUD_RATE: u32 = 62_500;

pub const SYNC: [u8; 2] = [0x55, 0xAA];
pub const SYNC_REPLY: u8 = 0xCC;

const ACK_MASK: u8 = 0x40;
const NAK: u8 = 0x7F;

pub mod command {
    pub const READ_BLOCK: u8 = 0xA0;
    pub const ERASE_SECTOR: u8 = 0xB0;
    pub const WRITE_BLOCK: u8 = 0xC0;
    pub const VERIFY: u8 = 0xD0;
}

/// Authentication mode of the kernel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootMode {
    /// ECU on the bench or in recovery
    Bench,
    /// ECU installed in the car
    #[default]
    Normal,
}

impl BootMode {
    pub fn challenge(self) -> [u8; 6] {
        match self {
            BootMode::Bench => [0x42, 0x45, 0x4E, 0x43, 0x48, 0x31],
            BootMode::Normal => [0x4E, 0x4F, 0x52, 0x4D, 0x41, 0x4C],
        }
    }

    /// Byte the kernel answers the challenge with once initialized
    pub fn kernel_reply(self) -> u8 {
        match self {
            BootMode::Bench => 0xA5,
            BootMode::Normal => 0x5A,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BootloaderProtocol {
    config: ProtocolConfig,
    mode: BootMode,
    baud_rate: u32,
}

impl Default for BootloaderProtocol {
    fn default() -> Self {
        Self::new(ProtocolConfig::bootloader(), BootMode::default())
    }
}

impl BootloaderProtocol {
    pub fn new(config: ProtocolConfig, mode: BootMode) -> Self {
        Self {
            config,
            mode,
            baud_rate: BOOT_BAUD_RATE,
        }
    }

    pub fn with_mode(mut self, mode: BootMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn name(&self) -> &'static str {
        "bootloader"
    }

    pub fn mode(&self) -> BootMode {
        self.mode
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Send a sealed packet and return the reply without its checksum
    async fn exchange(
        &self,
        conn: &dyn Connection,
        step: &'static str,
        body: &[u8],
    ) -> ProtocolResult<Vec<u8>> {
        let response = conn.send_frame(&seal_packet(body)).await?;
        if !verify_packet(&response) {
            warn!(step, response = %hex::encode(&response), "Bootloader reply failed checksum");
            return Err(ProtocolError::BadChecksum { step });
        }
        Ok(response[..response.len() - 1].to_vec())
    }

    /// Run a kernel command and return the data after the acknowledge byte
    async fn command(
        &self,
        conn: &dyn Connection,
        step: &'static str,
        body: &[u8],
    ) -> ProtocolResult<Vec<u8>> {
        let cmd = body.first().copied().unwrap_or_default();
        let reply = self.exchange(conn, step, body).await?;
        match reply.as_slice() {
            [ack, data @ ..] if *ack == cmd ^ ACK_MASK => Ok(data.to_vec()),
            [NAK, _, code, ..] => Err(ProtocolError::Rejected {
                command: cmd,
                code: *code,
            }),
            [actual, ..] => Err(ProtocolError::UnexpectedByte {
                step,
                expected: cmd ^ ACK_MASK,
                actual: *actual,
            }),
            [] => Err(ProtocolError::ShortResponse {
                step,
                expected: 1,
                actual: 0,
            }),
        }
    }

    /// Single reply byte of a handshake step
    async fn expect_byte(
        &self,
        conn: &dyn Connection,
        step: &'static str,
        body: &[u8],
        expected: u8,
    ) -> ProtocolResult<()> {
        let reply = self.exchange(conn, step, body).await?;
        match reply.first() {
            Some(&actual) if actual == expected => Ok(()),
            Some(&actual) => Err(ProtocolError::UnexpectedByte {
                step,
                expected,
                actual,
            }),
            None => Err(ProtocolError::ShortResponse {
                step,
                expected: 1,
                actual: 0,
            }),
        }
    }

    async fn sync(&self, conn: &dyn Connection) -> ProtocolResult<()> {
        self.expect_byte(conn, "sync", &SYNC, SYNC_REPLY).await
    }

    async fn enter_kernel(&self, conn: &dyn Connection, events: &EventSink) -> ProtocolResult<()> {
        conn.send_break(BREAK_DURATION).await?;
        conn.set_baud_rate(self.baud_rate).await?;
        self.sync(conn).await?;
        info!(baud_rate = self.baud_rate, "Bootloader sync complete");
        events.ecu(EcuEventKind::BootModeEntered, None);

        events.ecu(
            EcuEventKind::SecurityAccessRequested,
            Some(EventPayload::Message {
                text: format!("{:?} mode", self.mode),
            }),
        );
        let expected = self.mode.kernel_reply();
        if let Err(e) = self
            .expect_byte(conn, "kernel init", &self.mode.challenge(), expected)
            .await
        {
            warn!(mode = ?self.mode, error = %e, "Kernel challenge refused");
            events.ecu(
                EcuEventKind::SecurityAccessDenied,
                Some(EventPayload::Message {
                    text: e.to_string(),
                }),
            );
            return Err(e);
        }

        events.ecu(EcuEventKind::KernelInitialized, None);
        events.ecu(EcuEventKind::SecurityAccessGranted, None);
        ProgressTracker::new(events, RomPhase::Negotiating, 0)
            .finish(Some(format!("kernel ready at {} baud", self.baud_rate)));
        info!(mode = ?self.mode, "Bootloader kernel initialized");
        Ok(())
    }

    // =========================================================================
    // Capability
    // =========================================================================

    /// Send only the sync pair; a kernel that is already running answers it
    pub async fn can_handle(&self, conn: &dyn Connection) -> bool {
        match self.sync(conn).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Bootloader probe failed");
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
        self.enter_kernel(conn, events).await?;

        let mut rom = vec![0u8; self.config.rom_size];
        let mut progress = ProgressTracker::new(events, RomPhase::Reading, rom.len() as u64);
        let block_size = self.config.block_size;

        for (index, block) in rom.chunks_mut(block_size).enumerate() {
            let address = self
                .config
                .rom_start
                .wrapping_add((index * block_size) as u32);
            let mut request = vec![command::READ_BLOCK];
            request.extend_from_slice(&address.to_be_bytes());
            request.extend_from_slice(&(block.len() as u16).to_be_bytes());

            let data = self.command(conn, "read block", &request).await?;
            if data.len() < block.len() {
                return Err(ProtocolError::ShortResponse {
                    step: "read block",
                    expected: block.len(),
                    actual: data.len(),
                });
            }
            block.copy_from_slice(&data[..block.len()]);
            progress.advance(block.len() as u64, None);
        }

        info!(bytes = rom.len(), "ROM read complete");
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
        self.enter_kernel(conn, events).await?;

        let sector_size = self.config.sector_size;
        let total = (sectors.len() * sector_size) as u64;
        let mut progress = ProgressTracker::new(events, RomPhase::Writing, total);
        let mut erased = ProgressTracker::new(events, RomPhase::Erasing, total);

        if options.dry_run {
            info!(sectors = sectors.len(), "Dry run, flash not modified");
            progress.finish(Some("dry run: flash not modified".to_string()));
            return Ok(());
        }

        for &index in &sectors {
            let address = self.config.sector_address(index);
            let sector = Some(EventPayload::Sector { index, address });

            events.ecu(EcuEventKind::SectorEraseStarted, sector.clone());
            let mut erase = vec![command::ERASE_SECTOR];
            erase.extend_from_slice(&address.to_be_bytes());
            self.command(conn, "erase sector", &erase).await?;
            events.ecu(EcuEventKind::SectorEraseComplete, sector);
            erased.advance(sector_size as u64, None);

            let start = index * sector_size;
            let mut sequence: u8 = 1;
            for (block_index, block) in rom[start..start + sector_size]
                .chunks(self.config.block_size)
                .enumerate()
            {
                let block_address =
                    address.wrapping_add((block_index * self.config.block_size) as u32);
                let mut request = Vec::with_capacity(block.len() + 6);
                request.push(command::WRITE_BLOCK);
                request.push(sequence);
                request.extend_from_slice(&block_address.to_be_bytes());
                request.extend_from_slice(block);

                let echo = self.command(conn, "write block", &request).await?;
                match echo.first() {
                    Some(&actual) if actual == sequence => {}
                    actual => {
                        return Err(ProtocolError::UnexpectedByte {
                            step: "write block",
                            expected: sequence,
                            actual: actual.copied().unwrap_or_default(),
                        })
                    }
                }
                sequence = sequence.wrapping_add(1);
                progress.advance(block.len() as u64, None);
            }
            info!(sector = index, address = format_args!("0x{address:08X}"), "Sector programmed");
        }

        let crc = crc32(rom);
        let mut verify = vec![command::VERIFY];
        verify.extend_from_slice(&crc.to_be_bytes());
        self.command(conn, "verify", &verify).await?;
        ProgressTracker::new(events, RomPhase::Verifying, rom.len() as u64)
            .finish(Some(format!("CRC-32 0x{crc:08X}")));
        info!(crc = format_args!("0x{crc:08X}"), "Image verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MockConnection;
    use crate::protocol::events::OperationEvent;
    use pretty_assertions::assert_eq;

    fn reply(body: &[u8]) -> Vec<u8> {
        seal_packet(body)
    }

    fn kernel(mode_reply: u8) -> MockConnection {
        MockConnection::new(move |req| {
            if !verify_packet(req) {
                return Ok(reply(&[NAK, req[0], 0x01]));
            }
            match req[0] {
                0x55 => Ok(reply(&[SYNC_REPLY])),
                0x42 | 0x4E => Ok(reply(&[mode_reply])),
                command::READ_BLOCK => {
                    let len = u16::from_be_bytes([req[5], req[6]]) as usize;
                    let mut body = vec![command::READ_BLOCK ^ ACK_MASK];
                    body.extend(std::iter::repeat(req[4]).take(len));
                    Ok(reply(&body))
                }
                command::ERASE_SECTOR => Ok(reply(&[command::ERASE_SECTOR ^ ACK_MASK])),
                command::WRITE_BLOCK => Ok(reply(&[command::WRITE_BLOCK ^ ACK_MASK, req[1]])),
                command::VERIFY => Ok(reply(&[command::VERIFY ^ ACK_MASK])),
                other => Ok(reply(&[NAK, other, 0x11])),
            }
        })
    }

    fn small_config() -> ProtocolConfig {
        ProtocolConfig {
            rom_size: 0x400,
            block_size: 0x80,
            sector_size: 0x200,
            ..ProtocolConfig::bootloader()
        }
    }

    fn ecu_kinds(rx: &mut tokio::sync::mpsc::UnboundedReceiver<OperationEvent>) -> Vec<EcuEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Some(ecu) = event.as_ecu() {
                kinds.push(ecu.kind);
            }
        }
        kinds
    }

    #[tokio::test]
    async fn test_entry_sequence_and_read() {
        let conn = kernel(0xA5);
        let protocol = BootloaderProtocol::new(small_config(), BootMode::Bench);
        let (events, mut rx) = EventSink::channel();

        let rom = protocol.read_rom(&conn, &events).await.unwrap();
        assert_eq!(rom.len(), 0x400);
        assert_eq!(rom[0x180], 0x80);
        assert_eq!(conn.breaks_sent(), 1);
        assert_eq!(conn.baud_rates(), vec![BOOT_BAUD_RATE]);
        assert_eq!(
            conn.requests()[1],
            seal_packet(&BootMode::Bench.challenge())
        );
        assert_eq!(
            ecu_kinds(&mut rx),
            vec![
                EcuEventKind::BootModeEntered,
                EcuEventKind::SecurityAccessRequested,
                EcuEventKind::KernelInitialized,
                EcuEventKind::SecurityAccessGranted,
            ]
        );
    }

    #[tokio::test]
    async fn test_wrong_mode_reply_is_denied() {
        // Kernel answers with the bench byte while the tool expects normal mode
        let conn = kernel(BootMode::Bench.kernel_reply());
        let protocol = BootloaderProtocol::new(small_config(), BootMode::Normal);
        let (events, mut rx) = EventSink::channel();

        let err = protocol.read_rom(&conn, &events).await.unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnexpectedByte {
                step: "kernel init",
                expected: 0x5A,
                actual: 0xA5
            }
        );
        let kinds = ecu_kinds(&mut rx);
        assert_eq!(kinds.last(), Some(&EcuEventKind::SecurityAccessDenied));
        assert!(!kinds.contains(&EcuEventKind::KernelInitialized));
    }

    #[tokio::test]
    async fn test_bad_reply_checksum() {
        let conn = MockConnection::new(|_| Ok(vec![SYNC_REPLY, 0x00]));
        let protocol = BootloaderProtocol::default();
        assert!(!protocol.can_handle(&conn).await);
        assert_eq!(
            protocol.sync(&conn).await,
            Err(ProtocolError::BadChecksum { step: "sync" })
        );
    }

    #[tokio::test]
    async fn test_incremental_write_restarts_sequence_per_sector() {
        let conn = kernel(0x5A);
        let protocol = BootloaderProtocol::new(small_config(), BootMode::Normal);
        let original = vec![0u8; 0x400];
        let mut modified = original.clone();
        modified[0x0010] = 1;
        modified[0x0300] = 1;
        let (events, mut rx) = EventSink::channel();

        protocol
            .write_rom(
                &conn,
                &modified,
                &WriteOptions::incremental(original),
                &events,
            )
            .await
            .unwrap();

        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Some(p) = event.as_progress() {
                progress.push((p.phase, p.bytes_processed));
            }
        }
        assert_eq!(progress.first(), Some(&(RomPhase::Negotiating, 0)));
        let erased: Vec<u64> = progress
            .iter()
            .filter(|(phase, _)| *phase == RomPhase::Erasing)
            .map(|&(_, bytes)| bytes)
            .collect();
        assert_eq!(erased, vec![0x200, 0x400]);

        let writes: Vec<(u8, [u8; 4])> = conn
            .requests()
            .iter()
            .filter(|r| r[0] == command::WRITE_BLOCK)
            .map(|r| (r[1], [r[2], r[3], r[4], r[5]]))
            .collect();
        assert_eq!(
            writes,
            vec![
                (1, [0, 0, 0x00, 0x00]),
                (2, [0, 0, 0x00, 0x80]),
                (3, [0, 0, 0x01, 0x00]),
                (4, [0, 0, 0x01, 0x80]),
                (1, [0, 0, 0x02, 0x00]),
                (2, [0, 0, 0x02, 0x80]),
                (3, [0, 0, 0x03, 0x00]),
                (4, [0, 0, 0x03, 0x80]),
            ]
        );
        assert_eq!(conn.count_requests(&[command::ERASE_SECTOR]), 2);
        assert_eq!(conn.count_requests(&[command::VERIFY]), 1);
    }

    #[tokio::test]
    async fn test_nak_is_reported() {
        let conn = MockConnection::new(|req| match req[0] {
            0x55 => Ok(seal_packet(&[SYNC_REPLY])),
            0x4E => Ok(seal_packet(&[0x5A])),
            _ => Ok(seal_packet(&[NAK, req[0], 0x22])),
        });
        let err = BootloaderProtocol::new(small_config(), BootMode::Normal)
            .read_rom(&conn, &EventSink::discard())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Rejected {
                command: command::READ_BLOCK,
                code: 0x22
            }
        );
    }
}
