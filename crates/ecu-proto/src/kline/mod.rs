//! K-line (ISO 14230) transport
//!
//! - [`flow_control`] - per-request CTS handshake with bounded retries
//! - [`link`] - [`KLineConnection`], a [`crate::Connection`] over a [`RawLink`]

pub mod flow_control;
pub mod link;

pub use flow_control::{FlowControlError, FlowControlManager, FlowControlState, RetryDecision};
pub use link::{KLineConnection, RawLink, CTS};
