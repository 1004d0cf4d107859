//! # smock interceptors
//!
//! Ready-made interceptors for the smock interception layer:
//!
//! - [`LoggingInterceptor`]: traces every hook, optionally with payload content
//! - [`RewriteInterceptor`]: applies declarative [`RewriteRule`]s
//! - [`RulesFile`]: loads rules and session configuration from JSON, YAML or TOML

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::uninlined_format_args)]

pub mod interceptors;
pub mod rules;

pub use interceptors::{
    Direction, LoggingInterceptor, RewriteInterceptor, RewriteOperation, RewriteRule,
};
pub use rules::RulesFile;
