//! Logging interceptor that traces all connection traffic for debugging

use async_trait::async_trait;
use regex::Regex;
use smock_core::connection::{Event, Payload, SharedConnection};
use smock_core::interceptor::{HookResult, Inbound, Interceptor, InterceptorStats};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Interceptor that logs every hook invocation and passes payloads through untouched
pub struct LoggingInterceptor {
    name: String,
    stats: Arc<RwLock<InterceptorStats>>,
    /// Restricts the connections this interceptor binds to; `None` binds everything
    url_pattern: Option<Regex>,
    /// Whether to log payload content (can be verbose)
    log_content: bool,
}

impl LoggingInterceptor {
    /// Create a new logging interceptor matching every URL
    pub fn new(log_content: bool) -> Self {
        Self {
            name: "logging".to_string(),
            stats: Arc::new(RwLock::new(InterceptorStats::default())),
            url_pattern: None,
            log_content,
        }
    }

    /// Only bind to connections whose URL matches `pattern`
    pub fn with_url_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.url_pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Statistics over message and send hooks
    pub async fn stats(&self) -> InterceptorStats {
        self.stats.read().await.clone()
    }

    async fn log_payload(&self, direction: &str, payload: &Payload, connection: &SharedConnection) {
        let start = Instant::now();

        if self.log_content {
            info!(
                "[{}] {} {} - {}",
                self.name,
                direction,
                connection.url(),
                payload.preview(256)
            );
        } else {
            debug!(
                "[{}] {} {} ({} bytes)",
                self.name,
                direction,
                connection.url(),
                payload.len()
            );
        }

        self.stats.write().await.record(start.elapsed(), false, false);
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, url: &str) -> bool {
        self.url_pattern
            .as_ref()
            .map_or(true, |pattern| pattern.is_match(url))
    }

    async fn on_open(&self, _event: &Event, connection: &SharedConnection) -> HookResult<()> {
        let protocol = connection.protocol();
        if protocol.is_empty() {
            info!("[{}] open {}", self.name, connection.url());
        } else {
            info!("[{}] open {} (protocol: {})", self.name, connection.url(), protocol);
        }
        Ok(())
    }

    async fn on_message(&self, payload: Payload, connection: &SharedConnection) -> HookResult<Inbound> {
        self.log_payload("<-", &payload, connection).await;
        Ok(Inbound::Forward(payload))
    }

    async fn on_send(&self, payload: Payload, connection: &SharedConnection) -> HookResult<Payload> {
        self.log_payload("->", &payload, connection).await;
        Ok(payload)
    }

    async fn on_error(&self, event: &Event, connection: &SharedConnection) -> HookResult<()> {
        warn!(
            "[{}] error on {}: {}",
            self.name,
            connection.url(),
            event.error.as_deref().unwrap_or("unknown error")
        );
        Ok(())
    }

    async fn on_close(&self, event: &Event, connection: &SharedConnection) -> HookResult<()> {
        match &event.close {
            Some(close) => info!(
                "[{}] close {} (code: {}, reason: {:?}, clean: {})",
                self.name,
                connection.url(),
                close.code,
                close.reason,
                close.was_clean
            ),
            None => info!("[{}] close {}", self.name, connection.url()),
        }
        Ok(())
    }
}
