//! Simulated ECU shared by the integration tests
//!
//! Answers the UDS services the protocols use and keeps a flash image that
//! erase and TransferData really modify, so tests can assert on the result.

#![allow(dead_code)]

use std::sync::Arc;

use ecu_proto::{ConnectionError, MockConnection, OperationEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

pub const SEED: [u8; 2] = [0x12, 0x34];

/// XOR-0xFF of [`SEED`], what the generic protocol sends back
pub const GENERIC_KEY: [u8; 2] = [0xED, 0xCB];

#[derive(Clone)]
pub struct HarnessOptions {
    /// Key the ECU accepts
    pub expected_key: Vec<u8>,
    /// Fail every request after this many TransferData requests
    pub drop_after_transfers: Option<usize>,
    /// RAM served by ReadMemoryByAddress outside the flash range
    pub ram: Vec<(u32, Vec<u8>)>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            expected_key: GENERIC_KEY.to_vec(),
            drop_after_transfers: None,
            ram: Vec::new(),
        }
    }
}

pub struct SimulatedEcu {
    pub conn: Arc<MockConnection>,
    pub flash: Arc<Mutex<Vec<u8>>>,
}

fn be_u32(bytes: &[u8]) -> usize {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
}

impl SimulatedEcu {
    pub fn new(flash: Vec<u8>, options: HarnessOptions) -> Self {
        let flash = Arc::new(Mutex::new(flash));
        let image = flash.clone();
        let mut download_cursor = 0usize;
        let mut transfers = 0usize;

        let conn = MockConnection::new(move |req| {
            if let Some(limit) = options.drop_after_transfers {
                if transfers >= limit {
                    return Err(ConnectionError::Closed);
                }
            }

            let mut flash = image.lock();
            let response = match req[0] {
                0x10 => vec![0x50, req[1]],
                0x27 if req[1] % 2 == 1 => vec![0x67, req[1], SEED[0], SEED[1]],
                0x27 if req[2..] == options.expected_key[..] => vec![0x67, req[1]],
                0x27 => vec![0x7F, 0x27, 0x35],
                0x23 => {
                    let address = be_u32(&req[2..6]);
                    let size = u16::from_be_bytes([req[6], req[7]]) as usize;
                    let ram = options
                        .ram
                        .iter()
                        .find(|(start, _)| *start as usize == address);
                    let data = match ram {
                        Some((_, bytes)) => bytes.get(..size),
                        None => flash.get(address..address + size),
                    };
                    match data {
                        Some(data) => [&[0x63][..], data].concat(),
                        None => vec![0x7F, 0x23, 0x31],
                    }
                }
                0x31 => {
                    if req[2..4] == [0xFF, 0x00] {
                        let address = be_u32(&req[4..8]);
                        let size = be_u32(&req[8..12]);
                        flash[address..address + size].fill(0xFF);
                    }
                    vec![0x71, req[1], req[2], req[3]]
                }
                0x34 => {
                    download_cursor = be_u32(&req[3..7]);
                    vec![0x74, 0x20, 0x04, 0x02]
                }
                0x36 => {
                    transfers += 1;
                    let data = &req[2..];
                    flash[download_cursor..download_cursor + data.len()].copy_from_slice(data);
                    download_cursor += data.len();
                    vec![0x76, req[1]]
                }
                0x37 => vec![0x77],
                0x11 => vec![0x51, req[1]],
                other => vec![0x7F, other, 0x11],
            };
            Ok(response)
        });

        Self {
            conn: Arc::new(conn),
            flash,
        }
    }

    pub fn with_flash(flash: Vec<u8>) -> Self {
        Self::new(flash, HarnessOptions::default())
    }

    /// Requests starting with `prefix`
    pub fn requests_with(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.conn
            .requests()
            .into_iter()
            .filter(|r| r.starts_with(prefix))
            .collect()
    }
}

pub fn drain(rx: &mut UnboundedReceiver<OperationEvent>) -> Vec<OperationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
