//! # smock core library
//!
//! `smock-core` is a transparent interception layer for WebSocket
//! connections. Once installed, every connection opened through it is
//! wrapped in a [`Session`] that lets independently registered interceptors
//! observe and rewrite traffic in both directions, for the connections whose
//! URL they match, without the application code noticing.
//!
//! ## Features
//!
//! - **Interceptor registry**: ordered, append-only, bound per connection at construction
//! - **Delegation sessions**: a full stand-in for the real connection
//! - **Transform pipelines**: outbound and inbound folds with fallback on hook failure
//! - **Lifecycle hooks**: `open`, `error` and `close` observation
//! - **Connectors**: a real WebSocket connector and an in-memory one for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use smock_core::connection::{ConnectOptions, EventListener, EventType, Payload};
//! use smock_core::connection::websocket::WebSocketConnector;
//! use smock_core::interceptor::{FnInterceptor, Inbound};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     smock_core::install(WebSocketConnector::new())?.use_interceptor(
//!         FnInterceptor::new(|url| url.starts_with("wss://chat."))
//!             .on_message(|payload, _| async move {
//!                 Ok(Inbound::Forward(payload.map_text(|t| t.to_uppercase())))
//!             }),
//!     );
//!
//!     let connection = smock_core::connect("wss://chat.example", ConnectOptions::new())?;
//!     connection.add_event_listener(
//!         EventType::Message,
//!         EventListener::function(|event| println!("{:?}", event.data)),
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`error`]: error types
//! - [`connection`]: the connection model and its implementations
//! - [`interceptor`]: the interceptor contract
//! - [`registry`]: the interceptor registry
//! - [`pipeline`]: transform and lifecycle hook execution
//! - [`session`]: the delegation wrapper
//! - [`install`]: global installation and the non-global [`Interception`]
//! - [`config`]: session configuration and config files

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod connection;
pub mod error;
pub mod install;
pub mod interceptor;
pub mod pipeline;
pub mod registry;
pub mod session;

// Re-export commonly used types for convenience
pub use config::{EmptyPayloadPolicy, SessionConfig};
pub use connection::{
    ConnectOptions, Connection, Connector, Event, EventListener, EventType, Payload, ReadyState,
    SharedConnection,
};
pub use error::{SmockError, SmockResult};
pub use install::{connect, install, install_with_config, is_installed, smock, Interception, Smock};
pub use interceptor::{FnInterceptor, HookResult, Inbound, Interceptor, InterceptorStats};
pub use registry::InterceptorRegistry;
pub use session::{Session, SessionStats};

/// Current version of the smock-core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
