//! Error types for smock operations.
//!
//! The interception layer itself never surfaces hook failures to the
//! application: those are recovered inside the pipelines and only logged.
//! The types here cover the rest: driving the underlying connection,
//! loading configuration and the process-wide installation state.
//!
//! # Examples
//!
//! ```rust
//! use smock_core::error::{ConnectionError, SmockError};
//!
//! let error = SmockError::Connection(ConnectionError::InvalidState {
//!     operation: "send".to_string(),
//!     state: "connecting".to_string(),
//! });
//!
//! assert_eq!(error.category(), "connection");
//! ```

use thiserror::Error;

/// The main error type for all smock operations.
#[derive(Error, Debug)]
pub enum SmockError {
    /// Errors raised by the underlying connection
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Configuration errors (invalid files, bad values, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The global registration API was used before `install`
    #[error("Interception layer is not installed")]
    NotInstalled,

    /// `install` was called a second time
    #[error("Interception layer is already installed")]
    AlreadyInstalled,

    /// A session was constructed outside of a Tokio runtime
    #[error("No Tokio runtime available: {reason}")]
    NoRuntime {
        /// Why the runtime handle could not be obtained
        reason: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        /// The underlying serde_json error
        source: serde_json::Error,
    },

    /// IO errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Generic errors for cases not covered by specific variants
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

/// Errors raised by connection implementations.
#[derive(Error, Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ConnectionError {
    /// The URL could not be parsed or uses an unsupported scheme
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Operation not allowed in the connection's current ready state
    #[error("Cannot {operation} while connection is {state}")]
    InvalidState { operation: String, state: String },

    /// Attempted to write a read-only property
    #[error("Property '{property}' is read-only")]
    ReadOnlyProperty { property: String },

    /// Property value has the wrong shape
    #[error("Invalid value for property '{property}': {reason}")]
    InvalidPropertyValue { property: String, reason: String },

    /// The opening handshake failed
    #[error("Handshake with {url} failed: {reason}")]
    HandshakeFailed { url: String, reason: String },

    /// The frame could not be handed to the I/O task
    #[error("Failed to send frame: {reason}")]
    SendFailed { reason: String },

    /// The connection is gone
    #[error("Connection closed: {reason}")]
    Closed { reason: String },

    /// Connecting took longer than the configured timeout
    #[error("Connecting to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    /// Close code outside of the application-usable range
    #[error("Invalid close code {code}: must be 1000 or in 3000..=4999")]
    InvalidCloseCode { code: u16 },
}

/// A failed interceptor hook.
///
/// Hooks return `anyhow::Result`; the pipelines wrap failures (and panics)
/// into this type before logging them. It never reaches the application.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Interceptor '{interceptor}' failed in {hook}: {reason}")]
pub struct HookError {
    /// Name of the failing interceptor
    pub interceptor: String,
    /// Hook that failed (`send`, `message`, `open`, ...)
    pub hook: &'static str,
    /// Failure description
    pub reason: String,
}

/// Configuration-related errors.
#[derive(Error, Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration file has invalid format
    #[error("Invalid configuration format in {path}: {reason}")]
    InvalidFormat { path: String, reason: String },

    /// Configuration parameter has invalid value
    #[error("Invalid value for parameter '{parameter}': {value} - {reason}")]
    InvalidValue {
        parameter: String,
        value: String,
        reason: String,
    },
}

/// Convenience type alias for Results using SmockError.
pub type SmockResult<T> = Result<T, SmockError>;

impl SmockError {
    /// Create a new internal error with a custom message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the error category for this error.
    ///
    /// Used as a structured field when errors are logged.
    pub fn category(&self) -> &'static str {
        match self {
            SmockError::Connection(_) => "connection",
            SmockError::Config(_) => "config",
            SmockError::NotInstalled | SmockError::AlreadyInstalled => "install",
            SmockError::NoRuntime { .. } => "runtime",
            SmockError::Serialization { .. } => "serialization",
            SmockError::Io { .. } => "io",
            SmockError::Internal { .. } => "internal",
        }
    }
}

impl From<url::ParseError> for SmockError {
    fn from(err: url::ParseError) -> Self {
        SmockError::Config(ConfigError::InvalidValue {
            parameter: "url".to_string(),
            value: err.to_string(),
            reason: "Invalid URL format".to_string(),
        })
    }
}

#[cfg(feature = "websocket")]
impl From<tokio_tungstenite::tungstenite::Error> for ConnectionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Io(_)
            | WsError::Protocol(_) => ConnectionError::Closed {
                reason: err.to_string(),
            },
            other => ConnectionError::SendFailed {
                reason: other.to_string(),
            },
        }
    }
}
