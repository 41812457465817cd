//! UDS (Unified Diagnostic Services, ISO 14229) request layer
//!
//! Only the services needed for session setup, security access, memory reads
//! and programming are modelled here.

mod error;
mod nrc;
mod services;

pub use error::UdsError;
pub use nrc::NegativeResponseCode;
pub use services::UdsService;

/// Positive response SID = request SID + this offset
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// Request SIDs of the services used here
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const READ_MEMORY_BY_ADDRESS: u8 = 0x23;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const REQUEST_DOWNLOAD: u8 = 0x34;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const REQUEST_TRANSFER_EXIT: u8 = 0x37;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
}

/// DiagnosticSessionControl (0x10) session types
pub mod session_type {
    pub const DEFAULT: u8 = 0x01;
    pub const PROGRAMMING: u8 = 0x02;
    /// Mitsubishi CAN extended diagnostic session
    pub const MITSUCAN_EXTENDED: u8 = 0x92;
}

/// RoutineControl (0x31): only startRoutine is used while programming
pub mod routine_sub_function {
    pub const START_ROUTINE: u8 = 0x01;
}

/// Routine identifiers used while programming
pub mod routine_id {
    /// Erase a memory range: params are a 4-byte address and 4-byte size
    pub const ERASE_MEMORY: u16 = 0xFF00;
    /// Verify the programmed image: params are the CRC-32 of the full ROM
    pub const VERIFY_MEMORY: u16 = 0xFF01;
}

/// ECUReset (0x11) reset types
pub mod reset_type {
    pub const HARD_RESET: u8 = 0x01;
}

/// addressAndLengthFormatIdentifier: 4-byte address, 2-byte size
pub const READ_MEMORY_FORMAT: u8 = 0x24;

/// addressAndLengthFormatIdentifier: 4-byte address, 4-byte size
pub const DOWNLOAD_FORMAT: u8 = 0x44;

/// Service IDs one ECU answers on
///
/// Vendor dialects occasionally move a service; override the field and pass
/// the set to [`UdsService::with_service_ids`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceIds {
    pub diagnostic_session_control: u8,
    pub ecu_reset: u8,
    pub read_data_by_id: u8,
    pub read_memory_by_address: u8,
    pub security_access: u8,
    pub routine_control: u8,
    pub request_download: u8,
    pub transfer_data: u8,
    pub request_transfer_exit: u8,
}

impl ServiceIds {
    /// ISO 14229 assignments
    pub const STANDARD: ServiceIds = {
        use self::service_id::*;
        ServiceIds {
            diagnostic_session_control: DIAGNOSTIC_SESSION_CONTROL,
            ecu_reset: ECU_RESET,
            read_data_by_id: READ_DATA_BY_ID,
            read_memory_by_address: READ_MEMORY_BY_ADDRESS,
            security_access: SECURITY_ACCESS,
            routine_control: ROUTINE_CONTROL,
            request_download: REQUEST_DOWNLOAD,
            transfer_data: TRANSFER_DATA,
            request_transfer_exit: REQUEST_TRANSFER_EXIT,
        }
    };
}

impl Default for ServiceIds {
    fn default() -> Self {
        Self::STANDARD
    }
}
