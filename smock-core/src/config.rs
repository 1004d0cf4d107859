//! Session configuration and config-file loading.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SmockResult};

/// What to do with an inbound message whose final payload is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyPayloadPolicy {
    /// Do not deliver it
    #[default]
    Suppress,
    /// Deliver it like any other message
    Deliver,
}

/// Behaviour knobs for sessions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Handling of empty inbound payloads
    #[serde(default)]
    pub empty_payload: EmptyPayloadPolicy,

    /// Include payload previews in debug logs
    #[serde(default)]
    pub log_payloads: bool,
}

impl SessionConfig {
    /// Deliver empty payloads instead of suppressing them.
    pub fn deliver_empty(mut self) -> Self {
        self.empty_payload = EmptyPayloadPolicy::Deliver;
        self
    }
}

/// Load a configuration value from a file.
///
/// Supports JSON, YAML, and TOML formats based on file extension.
///
/// # Examples
///
/// ```rust,no_run
/// use smock_core::config::{load_config_file, SessionConfig};
///
/// let config: SessionConfig = load_config_file("session.toml")?;
/// # Ok::<(), smock_core::error::SmockError>(())
/// ```
pub fn load_config_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> SmockResult<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|_e| ConfigError::FileNotFound {
        path: path.display().to_string(),
    })?;

    let invalid = |reason: String| ConfigError::InvalidFormat {
        path: path.display().to_string(),
        reason,
    };

    let value = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?,
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).map_err(|e| invalid(e.to_string()))?
        }
        Some("toml") => toml::from_str(&content).map_err(|e| invalid(e.to_string()))?,
        _ => {
            return Err(invalid(
                "Unsupported file format. Use .json, .yaml, or .toml".to_string(),
            )
            .into())
        }
    };

    Ok(value)
}
