//! Options used to open a connection.
//!
//! A session opens its real connection with exactly the options it was
//! constructed with, so everything a connector needs lives here.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConnectionError, SmockResult};

/// Parameters for opening a connection.
///
/// # Examples
///
/// ```rust
/// use smock_core::connection::ConnectOptions;
///
/// let options = ConnectOptions::new()
///     .with_protocol("graphql-ws")
///     .with_header("Authorization", "Bearer token");
/// assert_eq!(options.protocols, vec!["graphql-ws".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Requested subprotocols, in preference order
    #[serde(default)]
    pub protocols: Vec<String>,

    /// Extra handshake headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Handshake timeout
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            protocols: Vec::new(),
            headers: HashMap::new(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl ConnectOptions {
    /// Default options: no subprotocols, no extra headers, 30s timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an additional subprotocol.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Add a handshake header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Change the handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Check that `url` is an absolute `ws://` or `wss://` URL.
pub fn validate_url(url: &str) -> SmockResult<Url> {
    let parsed = Url::parse(url).map_err(|e| ConnectionError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(ConnectionError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}', expected ws or wss", other),
        }
        .into()),
    }
}

/// Check a close code supplied by the application.
pub fn validate_close_code(code: Option<u16>) -> SmockResult<()> {
    match code {
        None | Some(1000) | Some(3000..=4999) => Ok(()),
        Some(code) => Err(ConnectionError::InvalidCloseCode { code }.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectOptions::default();
        assert!(options.protocols.is_empty());
        assert_eq!(options.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_deserialize_humantime_timeout() {
        let options: ConnectOptions =
            serde_json::from_str(r#"{"protocols": ["chat"], "connect_timeout": "5s"}"#).unwrap();
        assert_eq!(options.protocols, vec!["chat".to_string()]);
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert!(options.headers.is_empty());
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("wss://example.test/socket").is_ok());
        assert!(validate_url("ws://127.0.0.1:9000").is_ok());
        assert!(validate_url("https://example.test").is_err());
        assert!(validate_url("not a url").is_err());
    }

    #[test]
    fn test_validate_close_code() {
        assert!(validate_close_code(None).is_ok());
        assert!(validate_close_code(Some(1000)).is_ok());
        assert!(validate_close_code(Some(4001)).is_ok());
        assert!(validate_close_code(Some(1006)).is_err());
    }
}
