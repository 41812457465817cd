//! Tool configuration
//!
//! Loaded from TOML. Every table and field is optional; missing values fall
//! back to the defaults below.
//!
//! ```toml
//! [ecu]
//! kind = "mitsucan"
//!
//! [ecu.key]
//! algorithm = "linear"
//!
//! [protocol]
//! rom_size = 0x100000
//! session_type = 0x92
//!
//! [protocol.checksum]
//! type = "fixup"
//! offset = 0x0BFFF0
//!
//! [flow_control]
//! cts_timeout_ms = 100
//! max_retries = 3
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{
    BootMode, BootloaderProtocol, ObdProtocol, Protocol, ProtocolConfig, UdsProtocol,
};
use crate::security::KeyAlgorithm;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub ecu: EcuConfig,

    /// Overrides the ECU family's built-in layout
    #[serde(default)]
    pub protocol: Option<ProtocolConfig>,

    #[serde(default)]
    pub flow_control: FlowControlConfig,

    #[serde(default)]
    pub kline: KLineConfig,

    #[serde(default)]
    pub live: LiveConfig,
}

impl ToolConfig {
    pub fn from_toml_str(s: &str) -> ProtocolResult<Self> {
        toml::from_str(s).map_err(|e| ProtocolError::InvalidConfig(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> ProtocolResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loading configuration");
        Self::from_toml_str(&content)
    }

    /// ROM layout in effect: the `[protocol]` table or the family preset
    pub fn protocol_config(&self) -> ProtocolConfig {
        self.protocol
            .clone()
            .unwrap_or_else(|| self.ecu.kind.default_config())
    }

    /// Build the configured protocol with its key strategy injected
    pub fn build_protocol(&self) -> ProtocolResult<Protocol> {
        let config = self.protocol_config();
        config.validate()?;

        let protocol = match self.ecu.kind {
            ProtocolKind::GenericUds | ProtocolKind::Mitsucan => {
                let base = if self.ecu.kind == ProtocolKind::Mitsucan {
                    UdsProtocol::mitsucan()
                } else {
                    UdsProtocol::generic()
                };
                let base = base.with_config(config);
                match &self.ecu.key {
                    Some(key) => base.with_key(key.build()?).into(),
                    None => base.into(),
                }
            }
            ProtocolKind::Bootloader => BootloaderProtocol::new(config, self.ecu.boot_mode).into(),
            ProtocolKind::Obd2 => ObdProtocol.into(),
        };
        Ok(protocol)
    }
}

// =============================================================================
// ECU selection
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    #[default]
    GenericUds,
    Mitsucan,
    Bootloader,
    Obd2,
}

impl ProtocolKind {
    pub fn default_config(self) -> ProtocolConfig {
        match self {
            ProtocolKind::GenericUds | ProtocolKind::Obd2 => ProtocolConfig::generic_uds(),
            ProtocolKind::Mitsucan => ProtocolConfig::mitsucan(),
            ProtocolKind::Bootloader => ProtocolConfig::bootloader(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcuConfig {
    #[serde(default)]
    pub kind: ProtocolKind,

    /// Replaces the family's default key derivation
    #[serde(default)]
    pub key: Option<KeyAlgorithm>,

    /// Bootloader authentication mode
    #[serde(default)]
    pub boot_mode: BootMode,
}

// =============================================================================
// Transport
// =============================================================================

/// K-line CTS flow control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowControlConfig {
    /// How long to wait for clear-to-send after each frame
    #[serde(default = "default_cts_timeout")]
    pub cts_timeout_ms: u64,

    /// Retries allowed before a request fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_cts_timeout() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    3
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            cts_timeout_ms: default_cts_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KLineConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Wait for the final response frame
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    10_400
}

fn default_response_timeout() -> u64 {
    1000
}

impl Default for KLineConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            response_timeout_ms: default_response_timeout(),
        }
    }
}

// =============================================================================
// Live data
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Pause between consecutive PID requests
    #[serde(default = "default_poll_delay")]
    pub poll_delay_ms: u64,
}

fn default_poll_delay() -> u64 {
    20
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            poll_delay_ms: default_poll_delay(),
        }
    }
}

impl LiveConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ToolConfig::from_toml_str("").unwrap();
        assert_eq!(config, ToolConfig::default());
        assert_eq!(config.flow_control.cts_timeout_ms, 100);
        assert_eq!(config.flow_control.max_retries, 3);
        assert_eq!(config.kline.baud_rate, 10_400);
        assert_eq!(config.live.poll_delay(), Duration::from_millis(20));
        assert_eq!(config.build_protocol().unwrap().name(), "generic_uds");
    }

    #[test]
    fn test_full_config() {
        let config = ToolConfig::from_toml_str(
            r#"
            [ecu]
            kind = "mitsucan"

            [ecu.key]
            algorithm = "xor_mask"
            mask = "A5C3"

            [protocol]
            rom_size = 0x100000
            session_type = 0x92

            [protocol.checksum]
            type = "fixup"
            offset = 0x0BFFF0

            [flow_control]
            max_retries = 5

            [live]
            poll_delay_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.flow_control.max_retries, 5);
        assert_eq!(config.flow_control.cts_timeout_ms, 100);
        assert_eq!(config.live.poll_delay_ms, 50);

        let Protocol::Uds(uds) = config.build_protocol().unwrap() else {
            panic!("expected a UDS protocol");
        };
        assert_eq!(uds.name(), "mitsucan");
        assert_eq!(uds.key_derivation().name(), "xor_mask");
        assert_eq!(uds.config().rom_size, 0x100000);
    }

    #[test]
    fn test_bootloader_mode_and_invalid_layout() {
        let config = ToolConfig::from_toml_str(
            r#"
            [ecu]
            kind = "bootloader"
            boot_mode = "bench"
            "#,
        )
        .unwrap();
        let Protocol::Bootloader(boot) = config.build_protocol().unwrap() else {
            panic!("expected the bootloader protocol");
        };
        assert_eq!(boot.mode(), BootMode::Bench);

        let config = ToolConfig::from_toml_str("[protocol]\nsector_size = 0x3000\n").unwrap();
        assert!(matches!(
            config.build_protocol(),
            Err(ProtocolError::InvalidConfig(_))
        ));
        assert!(ToolConfig::from_toml_str("[ecu]\nkind = \"unknown\"\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ecutool.toml");
        std::fs::write(&path, "[kline]\nbaud_rate = 9600\n").unwrap();
        assert_eq!(ToolConfig::load(&path).unwrap().kline.baud_rate, 9600);
        assert!(ToolConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
