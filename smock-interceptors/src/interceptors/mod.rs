//! Built-in interceptors for WebSocket traffic
//!
//! Concrete implementations of the `Interceptor` trait for the common cases:
//! tracing every hook and rewriting payloads from declarative rules.

pub mod logging;
pub mod rewrite;

pub use logging::LoggingInterceptor;
pub use rewrite::{Direction, RewriteInterceptor, RewriteOperation, RewriteRule};
