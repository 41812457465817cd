//! UDS Negative Response Codes (NRC)

use std::fmt;

/// Negative response codes seen during session setup, security access and
/// programming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeResponseCode {
    GeneralReject,
    ServiceNotSupported,
    SubFunctionNotSupported,
    IncorrectMessageLengthOrFormat,
    BusyRepeatRequest,
    ConditionsNotCorrect,
    RequestSequenceError,
    RequestOutOfRange,
    SecurityAccessDenied,
    InvalidKey,
    ExceededNumberOfAttempts,
    RequiredTimeDelayNotExpired,
    UploadDownloadNotAccepted,
    TransferDataSuspended,
    GeneralProgrammingFailure,
    WrongBlockSequenceCounter,
    /// Request received, answer will follow
    ResponsePending,
    ServiceNotSupportedInActiveSession,
    VoltageTooHigh,
    VoltageTooLow,
    Unknown(u8),
}

use NegativeResponseCode as Nrc;

/// Wire byte of every named code
const CODES: [(u8, Nrc); 20] = [
    (0x10, Nrc::GeneralReject),
    (0x11, Nrc::ServiceNotSupported),
    (0x12, Nrc::SubFunctionNotSupported),
    (0x13, Nrc::IncorrectMessageLengthOrFormat),
    (0x21, Nrc::BusyRepeatRequest),
    (0x22, Nrc::ConditionsNotCorrect),
    (0x24, Nrc::RequestSequenceError),
    (0x31, Nrc::RequestOutOfRange),
    (0x33, Nrc::SecurityAccessDenied),
    (0x35, Nrc::InvalidKey),
    (0x36, Nrc::ExceededNumberOfAttempts),
    (0x37, Nrc::RequiredTimeDelayNotExpired),
    (0x70, Nrc::UploadDownloadNotAccepted),
    (0x71, Nrc::TransferDataSuspended),
    (0x72, Nrc::GeneralProgrammingFailure),
    (0x73, Nrc::WrongBlockSequenceCounter),
    (0x78, Nrc::ResponsePending),
    (0x7F, Nrc::ServiceNotSupportedInActiveSession),
    (0x92, Nrc::VoltageTooHigh),
    (0x93, Nrc::VoltageTooLow),
];

impl NegativeResponseCode {
    /// Codes that mean the security handshake itself was refused
    pub fn is_security_rejection(&self) -> bool {
        matches!(
            self,
            Nrc::SecurityAccessDenied
                | Nrc::InvalidKey
                | Nrc::ExceededNumberOfAttempts
                | Nrc::RequiredTimeDelayNotExpired
        )
    }

    pub fn byte(self) -> u8 {
        match self {
            Nrc::Unknown(byte) => byte,
            named => CODES
                .iter()
                .find_map(|&(byte, code)| (code == named).then_some(byte))
                .unwrap_or_default(),
        }
    }
}

impl From<u8> for NegativeResponseCode {
    fn from(value: u8) -> Self {
        CODES
            .iter()
            .find_map(|&(byte, code)| (byte == value).then_some(code))
            .unwrap_or(Nrc::Unknown(value))
    }
}

impl From<NegativeResponseCode> for u8 {
    fn from(nrc: NegativeResponseCode) -> Self {
        nrc.byte()
    }
}

impl fmt::UpperHex for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.byte(), f)
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Nrc::Unknown(v) => write!(f, "Unknown(0x{:02X})", v),
            // Debug output of the unit variants is exactly their name
            other => write!(f, "{:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_round_trip() {
        for byte in 0..=u8::MAX {
            let nrc = NegativeResponseCode::from(byte);
            assert_eq!(u8::from(nrc), byte);
        }
        assert_eq!(NegativeResponseCode::from(0x78), Nrc::ResponsePending);
    }

    #[test]
    fn test_formatting() {
        let nrc = NegativeResponseCode::InvalidKey;
        assert_eq!(format!("{nrc} (0x{nrc:02X})"), "InvalidKey (0x35)");
        assert_eq!(NegativeResponseCode::from(0xEE).to_string(), "Unknown(0xEE)");
        assert!(nrc.is_security_rejection());
        assert!(!NegativeResponseCode::ResponsePending.is_security_rejection());
    }
}
