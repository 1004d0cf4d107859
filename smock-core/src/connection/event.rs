//! Events and payloads flowing through a connection.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of an event dispatched by a connection.
///
/// The four lifecycle/message types of a WebSocket get their own variants;
/// anything else is carried verbatim in `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Connection established
    Open,
    /// Inbound message
    Message,
    /// Transport error
    Error,
    /// Connection closed
    Close,
    /// Any other event name
    Custom(String),
}

impl EventType {
    /// Wire name of this event type.
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Open => "open",
            EventType::Message => "message",
            EventType::Error => "error",
            EventType::Close => "close",
            EventType::Custom(name) => name,
        }
    }

    /// Whether this is one of the lifecycle types observed by interceptor hooks.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, EventType::Open | EventType::Error | EventType::Close)
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        match name {
            "open" => EventType::Open,
            "message" => EventType::Message,
            "error" => EventType::Error,
            "close" => EventType::Close,
            other => EventType::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        EventType::from(name.as_str())
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventType::from(s))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message payload, either text or binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame
    Binary(Bytes),
}

impl Payload {
    /// Create a text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text(text.into())
    }

    /// Create a binary payload.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Payload::Binary(data.into())
    }

    /// Whether the payload carries no data.
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Text(text) => text.is_empty(),
            Payload::Binary(data) => data.is_empty(),
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(data) => data.len(),
        }
    }

    /// Text content, if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Binary(_) => None,
        }
    }

    /// Apply `f` to text payloads; binary payloads pass through untouched.
    pub fn map_text(self, f: impl FnOnce(String) -> String) -> Self {
        match self {
            Payload::Text(text) => Payload::Text(f(text)),
            binary => binary,
        }
    }

    /// Short human-readable form for logs.
    pub fn preview(&self, max: usize) -> String {
        match self {
            Payload::Text(text) if text.chars().count() > max => {
                let head: String = text.chars().take(max).collect();
                format!("{}…", head)
            }
            Payload::Text(text) => text.clone(),
            Payload::Binary(data) => format!("<{} bytes>", data.len()),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(data))
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Binary(data)
    }
}

/// Details carried by a `close` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseInfo {
    /// Close code sent by the peer (1005 when none was given)
    pub code: u16,
    /// Close reason
    pub reason: String,
    /// Whether the closing handshake completed
    pub was_clean: bool,
}

/// An event dispatched by a connection to its listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event type
    pub event_type: EventType,
    /// Message payload (message events only)
    pub data: Option<Payload>,
    /// Origin of the message
    pub origin: String,
    /// Last event id
    pub last_event_id: String,
    /// Close details (close events only)
    pub close: Option<CloseInfo>,
    /// Error description (error events only)
    pub error: Option<String>,
    /// When the event was created
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a bare event of the given type.
    pub fn new(event_type: impl Into<EventType>) -> Self {
        Self {
            event_type: event_type.into(),
            data: None,
            origin: String::new(),
            last_event_id: String::new(),
            close: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// `open` event.
    pub fn open() -> Self {
        Self::new(EventType::Open)
    }

    /// `message` event carrying `data`, originating from `origin`.
    pub fn message(data: impl Into<Payload>, origin: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
            origin: origin.into(),
            ..Self::new(EventType::Message)
        }
    }

    /// `error` event.
    pub fn error(description: impl Into<String>) -> Self {
        Self {
            error: Some(description.into()),
            ..Self::new(EventType::Error)
        }
    }

    /// `close` event.
    pub fn close(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        Self {
            close: Some(CloseInfo {
                code,
                reason: reason.into(),
                was_clean,
            }),
            ..Self::new(EventType::Close)
        }
    }

    /// Copy of this event with the payload replaced; every other field is kept.
    pub fn with_data(&self, data: Payload) -> Self {
        Self {
            data: Some(data),
            ..self.clone()
        }
    }
}
