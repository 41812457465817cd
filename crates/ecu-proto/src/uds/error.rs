//! UDS protocol errors

use thiserror::Error;

use super::NegativeResponseCode;
use crate::connection::ConnectionError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UdsError {
    #[error("Negative response: {nrc} (0x{nrc:02X}) for service 0x{service_id:02X}")]
    NegativeResponse {
        service_id: u8,
        nrc: NegativeResponseCode,
    },

    /// First response byte was neither the positive response nor 0x7F
    #[error("Unexpected response to service 0x{service_id:02X}: expected 0x{expected:02X}, received 0x{actual:02X}")]
    UnexpectedResponse {
        service_id: u8,
        expected: u8,
        actual: u8,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Response pending for too long")]
    Timeout,

    #[error(transparent)]
    Transport(#[from] ConnectionError),
}
