//! Connection capability
//!
//! A [`Connection`] is owned by the transport (USB-CAN adapter, K-line cable,
//! test mock). Protocols borrow it for the duration of one operation and issue
//! strictly one request at a time.
//!
//! - [`MockConnection`] answers from a handler closure and records requests
//! - [`crate::kline::KLineConnection`] frames requests over a raw byte link

pub mod error;
pub mod mock;

pub use error::ConnectionError;
pub use mock::MockConnection;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Unsolicited data received while a stream is active
#[derive(Debug, Clone)]
pub struct IncomingFrame {
    pub timestamp: Instant,
    pub data: Vec<u8>,
}

/// Half-duplex request/response link to an ECU
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send a request and wait for its response
    ///
    /// Implementations serialize callers; there is never more than one
    /// outstanding request on the bus.
    async fn send_frame(&self, request: &[u8]) -> Result<Vec<u8>, ConnectionError>;

    /// Start delivering unsolicited frames to the returned receiver
    async fn start_stream(&self) -> Result<broadcast::Receiver<IncomingFrame>, ConnectionError>;

    /// Stop unsolicited delivery. Stopping an inactive stream is not an error.
    async fn stop_stream(&self) -> Result<(), ConnectionError>;

    async fn close(&self) -> Result<(), ConnectionError>;

    /// Hold the line low for `duration` (K-line bootloader entry)
    async fn send_break(&self, _duration: Duration) -> Result<(), ConnectionError> {
        Err(ConnectionError::Unsupported("break".to_string()))
    }

    async fn set_baud_rate(&self, _baud_rate: u32) -> Result<(), ConnectionError> {
        Err(ConnectionError::Unsupported("baud rate switching".to_string()))
    }
}
