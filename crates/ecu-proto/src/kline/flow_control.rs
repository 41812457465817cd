//! K-line clear-to-send handshake
//!
//! ```text
//!            expect_cts            received_cts
//!   IDLE ─────────────▶ WAITING_CTS ─────────────▶ READY
//!    ▲                      │ deadline passes          │
//!    │ retry / reset        ▼                          │ expect_cts
//!    └──────────────────  ERROR ◀──────────────────────┘ (next frame)
//! ```
//!
//! One manager belongs to one logical request. The retry budget and the
//! exhausted flag live in the instance, so an exhausted request never affects
//! the next one.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::FlowControlConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowControlState {
    Idle,
    WaitingCts,
    Ready,
    Error,
}

/// Outcome of [`FlowControlManager::handle_timeout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowControlError {
    #[error("CTS not received within {timeout_ms} ms")]
    CtsTimeout { timeout_ms: u64 },

    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("cannot {action} from state {from:?}")]
    InvalidTransition {
        from: FlowControlState,
        action: &'static str,
    },
}

pub struct FlowControlManager {
    state: FlowControlState,
    retry_count: u32,
    max_retries: u32,
    cts_timeout: Duration,
    deadline: Option<Instant>,
    exhausted: bool,
}

impl FlowControlManager {
    pub fn new(config: &FlowControlConfig) -> Self {
        Self::with_limits(
            Duration::from_millis(config.cts_timeout_ms),
            config.max_retries,
        )
    }

    pub fn with_limits(cts_timeout: Duration, max_retries: u32) -> Self {
        Self {
            state: FlowControlState::Idle,
            retry_count: 0,
            max_retries,
            cts_timeout,
            deadline: None,
            exhausted: false,
        }
    }

    pub fn state(&self) -> FlowControlState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn cts_timeout(&self) -> Duration {
        self.cts_timeout
    }

    /// Arm the CTS deadline. Valid from IDLE or READY.
    pub fn expect_cts(&mut self) -> Result<Instant, FlowControlError> {
        self.expect_cts_within(self.cts_timeout)
    }

    fn expect_cts_within(&mut self, timeout: Duration) -> Result<Instant, FlowControlError> {
        match self.state {
            FlowControlState::Idle | FlowControlState::Ready => {
                let deadline = Instant::now() + timeout;
                self.deadline = Some(deadline);
                self.state = FlowControlState::WaitingCts;
                Ok(deadline)
            }
            from => Err(FlowControlError::InvalidTransition {
                from,
                action: "expect CTS",
            }),
        }
    }

    /// CTS arrived: cancel the deadline and move to READY
    pub fn received_cts(&mut self) -> Result<(), FlowControlError> {
        if self.state != FlowControlState::WaitingCts {
            return Err(FlowControlError::InvalidTransition {
                from: self.state,
                action: "receive CTS",
            });
        }
        self.deadline = None;
        self.state = FlowControlState::Ready;
        Ok(())
    }

    /// The deadline passed: WAITING_CTS -> ERROR
    pub fn timed_out(&mut self) {
        self.deadline = None;
        self.state = FlowControlState::Error;
    }

    /// Arm the default CTS deadline and drive `response` against it
    pub async fn await_cts<F, T>(&mut self, response: F) -> Result<T, FlowControlError>
    where
        F: Future<Output = T>,
    {
        self.await_cts_within(self.cts_timeout, response).await
    }

    /// Like [`await_cts`](Self::await_cts) with an explicit deadline, for
    /// replies that carry a full response rather than a bare CTS
    pub async fn await_cts_within<F, T>(
        &mut self,
        timeout: Duration,
        response: F,
    ) -> Result<T, FlowControlError>
    where
        F: Future<Output = T>,
    {
        let deadline = self.expect_cts_within(timeout)?;
        match tokio::time::timeout_at(deadline, response).await {
            Ok(value) => {
                self.received_cts()?;
                Ok(value)
            }
            Err(_) => {
                self.timed_out();
                debug!(timeout_ms = timeout.as_millis() as u64, "CTS deadline passed");
                Err(FlowControlError::CtsTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Account for a failed exchange.
    ///
    /// Up to `max_retries` failures return to IDLE with [`RetryDecision::Retry`];
    /// the next one sets the exhausted flag and stays in ERROR.
    pub fn handle_timeout(&mut self) -> RetryDecision {
        self.deadline = None;
        self.retry_count += 1;
        if self.retry_count <= self.max_retries {
            warn!(
                attempt = self.retry_count,
                max_retries = self.max_retries,
                "Flow control timeout, retrying"
            );
            self.state = FlowControlState::Idle;
            RetryDecision::Retry
        } else {
            warn!(attempts = self.retry_count, "Flow control retries exhausted");
            self.exhausted = true;
            self.state = FlowControlState::Error;
            RetryDecision::GiveUp
        }
    }

    /// Prepare another attempt. Valid from ERROR or IDLE, refused once the
    /// retry budget is exhausted.
    pub fn retry(&mut self) -> Result<(), FlowControlError> {
        if self.exhausted {
            return Err(FlowControlError::RetriesExhausted {
                attempts: self.retry_count,
            });
        }
        match self.state {
            FlowControlState::Error | FlowControlState::Idle => {
                self.state = FlowControlState::Idle;
                Ok(())
            }
            from => Err(FlowControlError::InvalidTransition {
                from,
                action: "retry",
            }),
        }
    }

    /// Back to IDLE with a fresh retry count. The exhausted flag is kept.
    pub fn transition_to_idle(&mut self) {
        self.deadline = None;
        self.retry_count = 0;
        self.state = FlowControlState::Idle;
    }

    /// Back to the freshly constructed state
    pub fn reset(&mut self) {
        self.transition_to_idle();
        self.exhausted = false;
    }
}
