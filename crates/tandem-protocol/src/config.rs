use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// How long a fetched device mapping stays fresh.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

/// Transport-level timeout for the HTTP directory client.
pub const DEFAULT_DIRECTORY_TIMEOUT_SECS: u64 = 10;

/// Tunables for pairing resolution.
///
/// Loaded from JSON; every field is optional and falls back to its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    pub refresh_interval_secs: u64,
    /// Base URL of the device-mapping directory. `None` means no directory is
    /// reachable yet (e.g. while a pairing is first being set up).
    pub directory_url: Option<String>,
    pub directory_timeout_secs: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            directory_url: None,
            directory_timeout_secs: DEFAULT_DIRECTORY_TIMEOUT_SECS,
        }
    }
}

impl PairingConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ProtocolError::Config(format!("parse failed: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.refresh_interval_secs == 0 {
            return Err(ProtocolError::Config(
                "refresh_interval_secs must be greater than zero".into(),
            ));
        }
        if self.directory_timeout_secs == 0 {
            return Err(ProtocolError::Config(
                "directory_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_secs(self.directory_timeout_secs)
    }
}
