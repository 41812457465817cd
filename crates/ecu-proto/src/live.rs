//! Live data polling
//!
//! A [`LiveStream`] owns a spawned task that polls the requested PIDs in
//! round-robin order, one request at a time, sleeping a fixed delay between
//! requests. Stopping is cooperative: the flag is checked once per poll, so
//! one in-flight request may still complete after [`LiveStream::stop`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ecu_codec::telemetry::{self, RaxBlockId};
use ecu_codec::CodecResult;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionError};
use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::obd;
use crate::uds::UdsService;

/// First DID of the OBD data identifier range (ISO 14229 Annex F)
pub const OBD_DID_BASE: u16 = 0xF400;

const FRAME_BUFFER: usize = 256;

/// How a PID is fetched from the ECU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PidSource {
    /// OBD-II mode 01 request
    Obd,
    /// Parameter of a RAX block read by address
    Rax { block: RaxBlockId, index: usize },
    /// ReadDataByIdentifier; the payload uses the OBD formula of the low byte
    UdsDid(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PidDescriptor {
    pub pid: u32,
    pub name: &'static str,
    pub unit: &'static str,
    pub source: PidSource,
}

impl PidDescriptor {
    pub fn obd(pid: u8) -> Self {
        let info = obd::describe(pid);
        Self {
            pid: u32::from(pid),
            name: info.name,
            unit: info.unit,
            source: PidSource::Obd,
        }
    }

    /// OBD PID read through its UDS data identifier
    pub fn uds_obd(pid: u8) -> Self {
        Self {
            source: PidSource::UdsDid(OBD_DID_BASE | u16::from(pid)),
            ..Self::obd(pid)
        }
    }

    /// Parameter `index` of RAX block `block`, numbered as a synthetic PID
    pub fn rax(block: RaxBlockId, index: usize) -> CodecResult<Self> {
        let pid = telemetry::synthetic_pid(block, index)?;
        let param = block.definition().parameter(index)?;
        Ok(Self {
            pid,
            name: param.name,
            unit: param.unit,
            source: PidSource::Rax { block, index },
        })
    }

    /// Every RAX parameter in PID order
    pub fn all_rax() -> Vec<Self> {
        telemetry::blocks()
            .iter()
            .flat_map(|def| {
                def.parameters
                    .iter()
                    .enumerate()
                    .map(move |(index, param)| Self {
                        pid: telemetry::PID_BASE
                            + def.id.index() as u32 * telemetry::PID_STRIDE
                            + index as u32,
                        name: param.name,
                        unit: param.unit,
                        source: PidSource::Rax {
                            block: def.id,
                            index,
                        },
                    })
            })
            .collect()
    }
}

/// One polled value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveDataFrame {
    pub pid: u32,
    pub name: &'static str,
    pub unit: &'static str,
    pub value: f64,
    /// Response bytes the value was decoded from
    pub raw: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamHealth {
    pub polls: u64,
    pub errors: u64,
    pub last_error: Option<String>,
    pub running: bool,
}

/// Fetch and decode one PID
pub async fn poll_once(
    conn: &dyn Connection,
    desc: &PidDescriptor,
) -> ProtocolResult<LiveDataFrame> {
    let (raw, value) = match desc.source {
        PidSource::Obd => {
            let pid = u8::try_from(desc.pid).map_err(|_| {
                ProtocolError::InvalidArgument(format!("0x{:X} is not an OBD-II PID", desc.pid))
            })?;
            let data = obd::request_pid(conn, pid).await?;
            let value = obd::describe(pid).formula.decode(&data)?;
            (data, value)
        }
        PidSource::Rax { block, index } => {
            let def = block.definition();
            let data = UdsService::new(conn)
                .read_memory_by_address(def.request_id, def.size as u16)
                .await?;
            let param = telemetry::decode_parameter(&data, block, index)?;
            (data, param.value)
        }
        PidSource::UdsDid(did) => {
            let data = UdsService::new(conn).read_data_by_id(did).await?;
            let value = obd::describe(did.to_be_bytes()[1]).formula.decode(&data)?;
            (data, value)
        }
    };

    Ok(LiveDataFrame {
        pid: desc.pid,
        name: desc.name,
        unit: desc.unit,
        value,
        raw,
        timestamp: Utc::now(),
    })
}

/// Handle to a running poll loop
pub struct LiveStream {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    frames: mpsc::Receiver<LiveDataFrame>,
    health: watch::Receiver<StreamHealth>,
}

impl LiveStream {
    /// Start polling `pids` on the current tokio runtime
    pub fn spawn(conn: Arc<dyn Connection>, pids: Vec<PidDescriptor>, delay: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let (frame_tx, frames) = mpsc::channel(FRAME_BUFFER);
        let (health_tx, health) = watch::channel(StreamHealth {
            running: true,
            ..StreamHealth::default()
        });

        let handle = tokio::spawn(poll_loop(conn, pids, delay, stop.clone(), frame_tx, health_tx));

        Self {
            stop,
            handle: Some(handle),
            frames,
            health,
        }
    }

    /// Next frame, or `None` once the loop has ended and the buffer is drained
    pub async fn recv(&mut self) -> Option<LiveDataFrame> {
        self.frames.recv().await
    }

    pub fn health(&self) -> StreamHealth {
        self.health.borrow().clone()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<StreamHealth> {
        self.health.clone()
    }

    /// Ask the loop to stop after the current poll
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Stop and wait for the loop to exit, returning the final health.
    ///
    /// Unread frames are discarded. Closing the buffer first releases a loop
    /// parked on a full channel.
    pub async fn join(mut self) -> StreamHealth {
        self.stop();
        self.frames.close();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Live data task failed");
            }
        }
        self.health()
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

async fn poll_loop(
    conn: Arc<dyn Connection>,
    pids: Vec<PidDescriptor>,
    delay: Duration,
    stop: Arc<AtomicBool>,
    frames: mpsc::Sender<LiveDataFrame>,
    health_tx: watch::Sender<StreamHealth>,
) {
    let mut health = StreamHealth {
        running: true,
        ..StreamHealth::default()
    };
    info!(pids = pids.len(), delay_ms = delay.as_millis() as u64, "Live data stream started");

    for desc in pids.iter().cycle() {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        health.polls += 1;
        match poll_once(conn.as_ref(), desc).await {
            Ok(frame) => {
                if frames.send(frame).await.is_err() {
                    debug!("Live data receiver closed");
                    break;
                }
            }
            Err(ProtocolError::Connection(ConnectionError::Closed)) => {
                health.errors += 1;
                health.last_error = Some(ConnectionError::Closed.to_string());
                warn!(pid = desc.pid, "Connection closed, stopping live data");
                break;
            }
            Err(e) => {
                health.errors += 1;
                health.last_error = Some(e.to_string());
                warn!(pid = desc.pid, error = %e, "Live data poll failed");
            }
        }
        health_tx.send_replace(health.clone());

        tokio::time::sleep(delay).await;
    }

    health.running = false;
    health_tx.send_replace(health.clone());
    info!(polls = health.polls, errors = health.errors, "Live data stream stopped");
}
