//! Protocol-level errors

use ecu_codec::CodecError;
use thiserror::Error;

use crate::connection::ConnectionError;
use crate::security::SecurityError;
use crate::uds::{NegativeResponseCode, UdsError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// Transport failures pass through unchanged
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Uds(UdsError),

    /// A handshake step received a byte other than the one it requires
    #[error("{step}: expected 0x{expected:02X}, received 0x{actual:02X}")]
    UnexpectedByte {
        step: &'static str,
        expected: u8,
        actual: u8,
    },

    #[error("security access denied: {0}")]
    SecurityAccessDenied(String),

    #[error("key derivation failed: {0}")]
    Security(#[from] SecurityError),

    #[error("ROM size mismatch: expected {expected} bytes, got {actual}")]
    RomSizeMismatch { expected: usize, actual: usize },

    #[error("{scheme} checksum mismatch: {matched} of {total} stored checksums valid")]
    ChecksumMismatch {
        scheme: &'static str,
        matched: usize,
        total: usize,
    },

    /// A bootloader reply failed its packet checksum
    #[error("{step}: response failed packet checksum")]
    BadChecksum { step: &'static str },

    /// The bootloader answered a command with a NAK
    #[error("command 0x{command:02X} rejected with code 0x{code:02X}")]
    Rejected { command: u8, code: u8 },

    #[error("{step}: response too short, expected {expected} bytes, got {actual}")]
    ShortResponse {
        step: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{protocol} does not support {operation}")]
    Unsupported {
        protocol: &'static str,
        operation: &'static str,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<UdsError> for ProtocolError {
    fn from(err: UdsError) -> Self {
        match err {
            UdsError::Transport(conn) => ProtocolError::Connection(conn),
            other => ProtocolError::Uds(other),
        }
    }
}

impl ProtocolError {
    /// The NRC carried by a UDS negative response, if this is one
    pub fn negative_response(&self) -> Option<NegativeResponseCode> {
        match self {
            ProtocolError::Uds(UdsError::NegativeResponse { nrc, .. }) => Some(*nrc),
            _ => None,
        }
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uds_transport_errors_unwrap_to_connection() {
        let err = ProtocolError::from(UdsError::Transport(ConnectionError::Closed));
        assert_eq!(err, ProtocolError::Connection(ConnectionError::Closed));

        let err = ProtocolError::from(UdsError::NegativeResponse {
            service_id: 0x27,
            nrc: NegativeResponseCode::InvalidKey,
        });
        assert_eq!(err.negative_response(), Some(NegativeResponseCode::InvalidKey));
    }

    #[test]
    fn test_messages_name_the_failure() {
        let err = ProtocolError::UnexpectedByte {
            step: "kernel init",
            expected: 0xA5,
            actual: 0x5A,
        };
        assert_eq!(err.to_string(), "kernel init: expected 0xA5, received 0x5A");

        let err = ProtocolError::SecurityAccessDenied("InvalidKey (0x35)".to_string());
        assert!(err.to_string().starts_with("security access denied"));
    }
}
