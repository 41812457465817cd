//! Progress and milestone events emitted by long-running operations
//!
//! Operations write into an [`EventSink`]; the caller owns the receiving end
//! of the channel. Events are queued in emission order, so observers see
//! "requested" before "granted" and "erase started" before "erase complete"
//! without any extra synchronization.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Phase of a ROM operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RomPhase {
    Negotiating,
    Reading,
    Erasing,
    Writing,
    Verifying,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RomProgress {
    pub phase: RomPhase,
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub percent_complete: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// ECU milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EcuEventKind {
    SecurityAccessRequested,
    SecurityAccessGranted,
    SecurityAccessDenied,
    BootModeEntered,
    SectorEraseStarted,
    SectorEraseComplete,
    KernelInitialized,
    EcuResetting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Sector { index: usize, address: u32 },
    Security { level: u8 },
    Message { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EcuEvent {
    pub kind: EcuEventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<EventPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OperationEvent {
    Progress(RomProgress),
    Ecu(EcuEvent),
}

impl OperationEvent {
    pub fn as_ecu(&self) -> Option<&EcuEvent> {
        match self {
            OperationEvent::Ecu(event) => Some(event),
            OperationEvent::Progress(_) => None,
        }
    }

    pub fn as_progress(&self) -> Option<&RomProgress> {
        match self {
            OperationEvent::Progress(progress) => Some(progress),
            OperationEvent::Ecu(_) => None,
        }
    }
}

/// Where an operation reports to. The default sink discards everything.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<OperationEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OperationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn discard() -> Self {
        Self::default()
    }

    fn send(&self, event: OperationEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is listening
            let _ = tx.send(event);
        }
    }

    pub fn progress(&self, progress: RomProgress) {
        self.send(OperationEvent::Progress(progress));
    }

    pub fn ecu(&self, kind: EcuEventKind, payload: Option<EventPayload>) {
        self.send(OperationEvent::Ecu(EcuEvent {
            kind,
            timestamp: Utc::now(),
            payload,
        }));
    }
}

/// Emits progress for one phase with non-decreasing `bytes_processed`
pub struct ProgressTracker<'a> {
    sink: &'a EventSink,
    phase: RomPhase,
    total: u64,
    processed: u64,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(sink: &'a EventSink, phase: RomPhase, total: u64) -> Self {
        Self {
            sink,
            phase,
            total,
            processed: 0,
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.processed.saturating_mul(100) / self.total).min(100) as u8
    }

    fn emit(&self, message: Option<String>) {
        self.sink.progress(RomProgress {
            phase: self.phase,
            bytes_processed: self.processed,
            total_bytes: self.total,
            percent_complete: self.percent(),
            message,
        });
    }

    /// Add `bytes` to the processed count and report
    pub fn advance(&mut self, bytes: u64, message: Option<String>) {
        self.processed = self.processed.saturating_add(bytes).min(self.total);
        self.emit(message);
    }

    /// Report the whole phase as done
    pub fn finish(&mut self, message: Option<String>) {
        self.processed = self.total;
        self.emit(message);
    }
}
