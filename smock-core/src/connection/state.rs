//! Property surface shared by connection implementations.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConnectionError, SmockResult};

/// Ready state of a connection, numbered like the WebSocket constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    /// Handshake in progress
    Connecting = 0,
    /// Open and ready to send
    Open = 1,
    /// Closing handshake in progress
    Closing = 2,
    /// Closed or failed to open
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    /// Whether the connection has started (or finished) closing.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReadyState::Closing | ReadyState::Closed)
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadyState::Connecting => "connecting",
            ReadyState::Open => "open",
            ReadyState::Closing => "closing",
            ReadyState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How binary messages are surfaced to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryType {
    /// Binary data as a blob
    #[default]
    Blob,
    /// Binary data as an array buffer
    ArrayBuffer,
}

impl BinaryType {
    /// Property value name.
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryType::Blob => "blob",
            BinaryType::ArrayBuffer => "arraybuffer",
        }
    }
}

/// Names of the built-in connection properties.
pub mod props {
    /// `url` (read-only)
    pub const URL: &str = "url";
    /// `protocol` (read-only)
    pub const PROTOCOL: &str = "protocol";
    /// `extensions` (read-only)
    pub const EXTENSIONS: &str = "extensions";
    /// `readyState` (read-only)
    pub const READY_STATE: &str = "readyState";
    /// `bufferedAmount` (read-only)
    pub const BUFFERED_AMOUNT: &str = "bufferedAmount";
    /// `binaryType` (read-write)
    pub const BINARY_TYPE: &str = "binaryType";
}

/// Mutable state behind a connection's property surface.
///
/// Built-in properties are typed; any other name is an expando property
/// stored as a JSON value, readable and writable like on a script object.
pub struct ConnectionState {
    url: String,
    protocol: RwLock<String>,
    extensions: RwLock<String>,
    ready_state: AtomicU8,
    buffered_amount: AtomicU64,
    binary_type: RwLock<BinaryType>,
    expando: RwLock<HashMap<String, Value>>,
}

impl ConnectionState {
    /// Fresh state in `Connecting`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocol: RwLock::new(String::new()),
            extensions: RwLock::new(String::new()),
            ready_state: AtomicU8::new(ReadyState::Connecting as u8),
            buffered_amount: AtomicU64::new(0),
            binary_type: RwLock::new(BinaryType::default()),
            expando: RwLock::new(HashMap::new()),
        }
    }

    /// Connection URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Negotiated subprotocol.
    pub fn protocol(&self) -> String {
        self.protocol
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the negotiated subprotocol.
    pub fn set_protocol(&self, protocol: impl Into<String>) {
        *self.protocol.write().unwrap_or_else(PoisonError::into_inner) = protocol.into();
    }

    /// Negotiated extensions.
    pub fn extensions(&self) -> String {
        self.extensions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the negotiated extensions.
    pub fn set_extensions(&self, extensions: impl Into<String>) {
        *self
            .extensions
            .write()
            .unwrap_or_else(PoisonError::into_inner) = extensions.into();
    }

    /// Current ready state.
    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::SeqCst))
    }

    /// Move to `state`.
    pub fn set_ready_state(&self, state: ReadyState) {
        self.ready_state.store(state as u8, Ordering::SeqCst);
    }

    /// Bytes queued but not yet written.
    pub fn buffered_amount(&self) -> u64 {
        self.buffered_amount.load(Ordering::SeqCst)
    }

    /// Account for `bytes` queued for writing.
    pub fn add_buffered(&self, bytes: u64) {
        self.buffered_amount.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Account for `bytes` written.
    pub fn sub_buffered(&self, bytes: u64) {
        let _ = self
            .buffered_amount
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    /// Current binary type.
    pub fn binary_type(&self) -> BinaryType {
        *self
            .binary_type
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the binary type.
    pub fn set_binary_type(&self, binary_type: BinaryType) {
        *self
            .binary_type
            .write()
            .unwrap_or_else(PoisonError::into_inner) = binary_type;
    }

    /// Read a property by name; `None` for an unknown expando name.
    pub fn property(&self, name: &str) -> Option<Value> {
        match name {
            props::URL => Some(Value::String(self.url.clone())),
            props::PROTOCOL => Some(Value::String(self.protocol())),
            props::EXTENSIONS => Some(Value::String(self.extensions())),
            props::READY_STATE => Some(Value::from(self.ready_state() as u8)),
            props::BUFFERED_AMOUNT => Some(Value::from(self.buffered_amount())),
            props::BINARY_TYPE => Some(Value::String(self.binary_type().as_str().to_string())),
            other => self
                .expando
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(other)
                .cloned(),
        }
    }

    /// Write a property by name.
    ///
    /// Read-only built-ins are rejected; `binaryType` only accepts its two
    /// valid names; any other name is stored as an expando property.
    pub fn set_property(&self, name: &str, value: Value) -> SmockResult<()> {
        match name {
            props::URL
            | props::PROTOCOL
            | props::EXTENSIONS
            | props::READY_STATE
            | props::BUFFERED_AMOUNT => Err(ConnectionError::ReadOnlyProperty {
                property: name.to_string(),
            }
            .into()),
            props::BINARY_TYPE => {
                let binary_type = match value.as_str() {
                    Some("blob") => BinaryType::Blob,
                    Some("arraybuffer") => BinaryType::ArrayBuffer,
                    _ => {
                        return Err(ConnectionError::InvalidPropertyValue {
                            property: name.to_string(),
                            reason: format!("expected \"blob\" or \"arraybuffer\", got {}", value),
                        }
                        .into())
                    }
                };
                self.set_binary_type(binary_type);
                Ok(())
            }
            other => {
                self.expando
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(other.to_string(), value);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionState")
            .field("url", &self.url)
            .field("ready_state", &self.ready_state())
            .field("binary_type", &self.binary_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_properties() {
        let state = ConnectionState::new("wss://example.test/feed");
        assert_eq!(state.property("url"), Some(json!("wss://example.test/feed")));
        assert_eq!(state.property("readyState"), Some(json!(0)));

        state.set_ready_state(ReadyState::Open);
        assert_eq!(state.property("readyState"), Some(json!(1)));
        assert!(!state.ready_state().is_terminal());
    }

    #[test]
    fn test_read_only_properties_reject_writes() {
        let state = ConnectionState::new("wss://x");
        let err = state.set_property("url", json!("wss://y")).unwrap_err();
        assert!(err.to_string().contains("read-only"));
        assert_eq!(state.url(), "wss://x");
    }

    #[test]
    fn test_binary_type_round_trip_through_properties() {
        let state = ConnectionState::new("wss://x");
        assert_eq!(state.binary_type(), BinaryType::Blob);

        state.set_property("binaryType", json!("arraybuffer")).unwrap();
        assert_eq!(state.binary_type(), BinaryType::ArrayBuffer);
        assert!(state.set_property("binaryType", json!("bytes")).is_err());
    }

    #[test]
    fn test_expando_properties() {
        let state = ConnectionState::new("wss://x");
        assert_eq!(state.property("tag"), None);

        state.set_property("tag", json!({"room": 7})).unwrap();
        assert_eq!(state.property("tag"), Some(json!({"room": 7})));
    }

    #[test]
    fn test_buffered_amount_saturates() {
        let state = ConnectionState::new("wss://x");
        state.add_buffered(10);
        state.sub_buffered(4);
        assert_eq!(state.buffered_amount(), 6);
        state.sub_buffered(100);
        assert_eq!(state.buffered_amount(), 0);
    }
}
