//! Connection abstraction and implementations.
//!
//! This module models the host side of the interception layer: the
//! capability surface of a bidirectional socket connection and the
//! constructor that opens one.
//!
//! - **memory**: in-process connection whose remote side is driven by code
//! - **websocket**: real network connection over `tokio-tungstenite`
//!
//! A [`Session`](crate::session::Session) implements [`Connection`] too,
//! which is what lets it stand in for the real thing.
//!
//! # Examples
//!
//! ```rust,no_run
//! use smock_core::connection::{ConnectOptions, Connector, EventListener, EventType};
//! use smock_core::connection::websocket::WebSocketConnector;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = WebSocketConnector::new().connect("wss://echo.example", ConnectOptions::new())?;
//!     connection.add_event_listener(
//!         EventType::Message,
//!         EventListener::function(|event| println!("{:?}", event.data)),
//!     );
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod event;
pub mod listener;
pub mod memory;
pub mod state;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use config::*;
pub use event::*;
pub use listener::*;
pub use memory::{MemoryConnection, MemoryConnector};
pub use state::{BinaryType, ConnectionState, ReadyState};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SmockResult;

/// A connection shared between its owner and the tasks observing it.
pub type SharedConnection = Arc<dyn Connection>;

/// Capability surface of a bidirectional socket connection.
///
/// All methods take `&self`: connections are shared with I/O tasks and
/// interceptor hooks, so implementations use interior mutability.
#[async_trait]
pub trait Connection: Send + Sync {
    /// URL the connection was opened with.
    fn url(&self) -> String;

    /// Subprotocol selected by the server (empty until open).
    fn protocol(&self) -> String;

    /// Extensions selected by the server (empty until open).
    fn extensions(&self) -> String;

    /// Current ready state.
    fn ready_state(&self) -> ReadyState;

    /// Bytes queued by `send` but not yet written.
    fn buffered_amount(&self) -> u64;

    /// How binary messages are surfaced.
    fn binary_type(&self) -> BinaryType;

    /// Change how binary messages are surfaced.
    fn set_binary_type(&self, binary_type: BinaryType);

    /// Read any property by name, built-in or expando.
    fn property(&self, name: &str) -> Option<Value>;

    /// Write any property by name.
    fn set_property(&self, name: &str, value: Value) -> SmockResult<()>;

    /// Queue `payload` for transmission.
    ///
    /// Fails while the connection is still connecting; silently discards the
    /// payload once the connection is closing or closed.
    async fn send(&self, payload: Payload) -> SmockResult<()>;

    /// Start the closing handshake.
    async fn close(&self, code: Option<u16>, reason: Option<String>) -> SmockResult<()>;

    /// Register `listener` for `event_type`; registering the same pair twice is a no-op.
    fn add_event_listener(&self, event_type: EventType, listener: EventListener);

    /// Unregister `listener` for `event_type`; unknown pairs are ignored.
    fn remove_event_listener(&self, event_type: &EventType, listener: &EventListener);
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("url", &self.url()).finish()
    }
}

/// Constructor for connections.
///
/// `connect` returns immediately with a connection in the `Connecting`
/// state; `open` (or `error` + `close`) is dispatched later.
pub trait Connector: Send + Sync {
    /// Open a connection to `url`.
    fn connect(&self, url: &str, options: ConnectOptions) -> SmockResult<SharedConnection>;

    /// Short name for logs.
    fn name(&self) -> &'static str {
        "connector"
    }
}

impl<C: Connector + ?Sized> Connector for Arc<C> {
    fn connect(&self, url: &str, options: ConnectOptions) -> SmockResult<SharedConnection> {
        (**self).connect(url, options)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
