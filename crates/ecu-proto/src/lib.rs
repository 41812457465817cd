//! ecu-proto - ECU session, security access, flashing and live-data protocols
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Protocol  (UDS generic / MitsuCAN, bootloader, OBD-II)      │
//! │    handshake · block read · sector write · live polling      │
//! ├──────────────────────────────┬───────────────────────────────┤
//! │  UdsService (0x10 0x27 ...)  │  KeyDerivation (seed -> key)  │
//! ├──────────────────────────────┴───────────────────────────────┤
//! │  Connection  (MockConnection, KLineConnection<RawLink>)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Protocols borrow a [`Connection`] for one operation and report progress
//! and milestones through an [`EventSink`]:
//!
//! ```no_run
//! use ecu_proto::{EventSink, MockConnection, Protocol};
//!
//! # async fn run() -> Result<(), ecu_proto::ProtocolError> {
//! let conn = MockConnection::new(|_| Ok(vec![0x7F, 0x00, 0x11]));
//! let protocol = Protocol::probe(&conn, Protocol::default_candidates())
//!     .await
//!     .ok_or(ecu_proto::ProtocolError::InvalidArgument("no ECU".into()))?;
//!
//! let (events, mut rx) = EventSink::channel();
//! let rom = protocol.read_rom(&conn, &events).await?;
//! while let Ok(event) = rx.try_recv() {
//!     println!("{event:?}");
//! }
//! # let _ = rom;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod kline;
pub mod live;
pub mod protocol;
pub mod security;
pub mod uds;

pub use config::{FlowControlConfig, KLineConfig, LiveConfig, ProtocolKind, ToolConfig};
pub use connection::{Connection, ConnectionError, IncomingFrame, MockConnection};
pub use error::{ProtocolError, ProtocolResult};
pub use kline::{FlowControlManager, FlowControlState, KLineConnection, RawLink};
pub use live::{LiveDataFrame, LiveStream, PidDescriptor, PidSource, StreamHealth};
pub use protocol::{
    BootMode, BootloaderProtocol, EcuEvent, EcuEventKind, EventSink, ObdProtocol,
    OperationEvent, Protocol, ProtocolConfig, RomPhase, RomProgress, UdsProtocol, UdsVariant,
    WriteOptions,
};
pub use security::{KeyAlgorithm, KeyDerivation, LinearKey, SecurityError, XorFfKey, XorMaskKey};
pub use uds::{NegativeResponseCode, UdsError, UdsService};
