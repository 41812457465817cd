//! ecu-codec - binary codecs for ECU diagnostics and flashing
//!
//! Everything in this crate is a pure function over byte buffers. Nothing here
//! performs I/O or holds shared state, so it can be used from protocol state
//! machines, offline ROM tooling and tests alike.
//!
//! # Modules
//!
//! - [`frame`] - ISO 14230 `[PCI][payload][checksum]` framing
//! - [`checksum`] - CRC and vendor ROM checksum algorithms
//! - [`bits`] - big-endian bit-field extraction
//! - [`telemetry`] - RAX block registry and synthetic PID numbering
//! - [`sector`] - changed-sector detection for incremental flashing
//!
//! # Example
//!
//! ```
//! use ecu_codec::frame;
//!
//! let bytes = frame::encode(&[0x21, 0x05]).unwrap();
//! let decoded = frame::decode(&bytes);
//! assert!(decoded.is_valid);
//! assert_eq!(decoded.payload, vec![0x21, 0x05]);
//! ```

pub mod bits;
pub mod checksum;
pub mod error;
pub mod frame;
pub mod sector;
pub mod telemetry;

pub use bits::extract_bits;
pub use checksum::{ChecksumReport, ChecksumScheme, TableStatus};
pub use error::{CodecError, CodecResult};
pub use frame::{DecodedFrame, Frame};
pub use sector::compute_changed_sectors;
pub use telemetry::{decode_block, decode_by_request_id, DecodedParameter, RaxBlockId};
