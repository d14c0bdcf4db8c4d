//! Transport configuration.
//!
//! Loaded from a camelCase JSON file. Every field has a default, so an empty
//! object (or a missing file) yields a usable local configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::error::ConfigError;

fn default_address() -> String {
    "127.0.0.1:11122".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_inbound_capacity() -> usize {
    64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// `host:port` of the jet daemon
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Capacity of the bounded inbound frame channel
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_frame_size: default_max_frame_size(),
            inbound_capacity: default_inbound_capacity(),
        }
    }
}

impl TransportConfig {
    /// Configuration for a daemon at `address`, other fields defaulted.
    #[must_use]
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Load config from file, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// holds out-of-range values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No transport config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Parse config from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or holds out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.address.is_empty() {
            return Err(ConfigError::Invalid("address must not be empty".to_string()));
        }
        if self.inbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "inboundCapacity must be at least 1".to_string(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::Invalid(
                "maxFrameSize must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
