//! The configuration surface consumed by the server core.
//!
//! Configuration persistence belongs to the management plane; the core
//! only consumes the four fields below. [`DwConfig::load_or_default`]
//! mirrors the embedded deployments this protocol grew up on: a missing
//! or unparsable file falls back to built-in defaults rather than
//! refusing to boot, so a freshly flashed device still answers the host.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use protocol::DRIVE_COUNT;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Baud rates the serial link accepts.
pub const SUPPORTED_BAUD_RATES: [u32; 8] = [
    9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600,
];

/// Rate applied when the configured one is not in [`SUPPORTED_BAUD_RATES`].
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Shared handle to the live configuration.
///
/// The dispatcher reads it at SERINIT time; the management plane swaps
/// it through [`Server::reload`](crate::Server::reload) only.
pub type SharedConfig = Arc<Mutex<DwConfig>>;

/// Server configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DwConfig {
    /// Image paths for the four drive slots; `null` leaves a slot empty.
    pub drives: [Option<PathBuf>; DRIVE_COUNT],
    /// Serial link rate; validated through [`DwConfig::effective_baud`].
    pub baud_rate: u32,
    /// Channel-index-as-text to TCP endpoint map consulted at SERINIT.
    pub serial_map: HashMap<String, SerialTarget>,
    /// Hours added to UTC when answering the TIME opcode.
    pub timezone_offset: i32,
}

impl Default for DwConfig {
    fn default() -> Self {
        Self {
            drives: [const { None }; DRIVE_COUNT],
            baud_rate: DEFAULT_BAUD_RATE,
            serial_map: HashMap::new(),
            timezone_offset: 0,
        }
    }
}

/// TCP endpoint a channel binds to at SERINIT.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SerialTarget {
    /// Remote host (client mode) or local bind address (server mode).
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Connection direction; defaults to client.
    #[serde(default)]
    pub mode: SerialMode,
}

/// Direction of a channel's TCP binding.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialMode {
    /// Dial out to the configured endpoint.
    #[default]
    Client,
    /// Listen and accept one connection at a time.
    Server,
}

/// Errors from an explicit [`DwConfig::load`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    /// The config file is not valid JSON for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl DwConfig {
    /// Loads the configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Loads the configuration, falling back to defaults on any failure.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(error) => {
                warn!(path = %path.display(), %error, "config unavailable, using defaults");
                Self::default()
            }
        }
    }

    /// The configured baud rate, or [`DEFAULT_BAUD_RATE`] when the
    /// configured value is unsupported.
    #[must_use]
    pub fn effective_baud(&self) -> u32 {
        if SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            self.baud_rate
        } else {
            warn!(
                configured = self.baud_rate,
                fallback = DEFAULT_BAUD_RATE,
                "unsupported baud rate"
            );
            DEFAULT_BAUD_RATE
        }
    }

    /// The configured timezone offset, zeroed when outside `[-12, 14]`.
    #[must_use]
    pub fn effective_timezone_offset(&self) -> i32 {
        if (-12..=14).contains(&self.timezone_offset) {
            self.timezone_offset
        } else {
            warn!(configured = self.timezone_offset, "timezone offset out of range");
            0
        }
    }

    /// Looks up the SERINIT endpoint for `channel`.
    ///
    /// The map is keyed by the decimal channel index as text, the way
    /// the JSON management surface stores it.
    #[must_use]
    pub fn serial_target(&self, channel: u8) -> Option<&SerialTarget> {
        self.serial_map.get(channel.to_string().as_str())
    }
}
