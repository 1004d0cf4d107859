//! Rules files: session configuration plus rewrite rules in one document.
//!
//! ```yaml
//! session:
//!   empty_payload: suppress
//! rules:
//!   - name: mask-cards
//!     url_pattern: "^wss://payments\\."
//!     direction: inbound
//!     operation:
//!       type: regex_replace
//!       pattern: "\\d{12}(\\d{4})"
//!       replacement: "************$1"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use smock_core::config::{load_config_file, SessionConfig};
use smock_core::error::SmockResult;

use crate::interceptors::{RewriteInterceptor, RewriteRule};

/// Contents of a rules file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulesFile {
    /// Configuration for sessions opened with these rules
    #[serde(default)]
    pub session: SessionConfig,

    /// Rewrite rules, in application order
    #[serde(default)]
    pub rules: Vec<RewriteRule>,
}

impl RulesFile {
    /// Load and validate a rules file (`.json`, `.yaml`/`.yml` or `.toml`).
    pub fn load(path: impl AsRef<Path>) -> SmockResult<Self> {
        let path = path.as_ref();
        let file: RulesFile = load_config_file(path)?;
        file.validate()?;
        tracing::debug!("Loaded {} rule(s) from {}", file.rules.len(), path.display());
        Ok(file)
    }

    /// Check every rule compiles.
    pub fn validate(&self) -> SmockResult<()> {
        self.interceptor().map(|_| ())
    }

    /// Build the interceptor applying these rules.
    pub fn interceptor(&self) -> SmockResult<RewriteInterceptor> {
        RewriteInterceptor::new(self.rules.clone())
    }
}
