//! Interceptor contract.
//!
//! An interceptor bundles a URL predicate with optional hooks. `matches` is
//! evaluated once, when a session is constructed; the hooks of a bound
//! interceptor then run for every message and lifecycle event of that
//! session. Hooks that are not overridden pass values through untouched.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::connection::{Event, Payload, SharedConnection};

/// Result type returned by interceptor hooks.
pub type HookResult<T> = anyhow::Result<T>;

/// Outcome of an inbound message hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Hand this payload to the next hook (or to the application)
    Forward(Payload),
    /// Do not deliver the message at all
    Drop,
}

impl From<Payload> for Inbound {
    fn from(payload: Payload) -> Self {
        Inbound::Forward(payload)
    }
}

/// Trait for interceptors that observe and rewrite connection traffic.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use smock_core::connection::{Payload, SharedConnection};
/// use smock_core::interceptor::{HookResult, Inbound, Interceptor};
///
/// struct Shout;
///
/// #[async_trait]
/// impl Interceptor for Shout {
///     fn matches(&self, url: &str) -> bool {
///         url.starts_with("wss://chat.")
///     }
///
///     async fn on_message(&self, payload: Payload, _: &SharedConnection) -> HookResult<Inbound> {
///         Ok(Inbound::Forward(payload.map_text(|t| t.to_uppercase())))
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Whether this interceptor applies to connections opened against `url`.
    fn matches(&self, url: &str) -> bool;

    /// Observe the `open` event.
    async fn on_open(&self, _event: &Event, _connection: &SharedConnection) -> HookResult<()> {
        Ok(())
    }

    /// Rewrite (or drop) an inbound message payload.
    async fn on_message(
        &self,
        payload: Payload,
        _connection: &SharedConnection,
    ) -> HookResult<Inbound> {
        Ok(Inbound::Forward(payload))
    }

    /// Rewrite an outbound payload.
    async fn on_send(&self, payload: Payload, _connection: &SharedConnection) -> HookResult<Payload> {
        Ok(payload)
    }

    /// Observe the `error` event.
    async fn on_error(&self, _event: &Event, _connection: &SharedConnection) -> HookResult<()> {
        Ok(())
    }

    /// Observe the `close` event.
    async fn on_close(&self, _event: &Event, _connection: &SharedConnection) -> HookResult<()> {
        Ok(())
    }
}

/// Statistics for an interceptor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterceptorStats {
    /// Total hook invocations
    pub total_intercepted: u64,
    /// Total payloads modified
    pub total_modified: u64,
    /// Total messages dropped
    pub total_dropped: u64,
    /// Average processing time in milliseconds
    pub avg_processing_time_ms: f64,
    /// Last processed timestamp
    pub last_processed: Option<chrono::DateTime<chrono::Utc>>,
}

impl InterceptorStats {
    /// Record one hook invocation that took `elapsed`.
    pub fn record(&mut self, elapsed: std::time::Duration, modified: bool, dropped: bool) {
        self.total_intercepted += 1;
        if modified {
            self.total_modified += 1;
        }
        if dropped {
            self.total_dropped += 1;
        }
        self.last_processed = Some(chrono::Utc::now());
        self.avg_processing_time_ms = (self.avg_processing_time_ms
            * (self.total_intercepted - 1) as f64
            + elapsed.as_secs_f64() * 1000.0)
            / self.total_intercepted as f64;
    }
}

type MatchFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;
type TransformFn<T> =
    Arc<dyn Fn(Payload, SharedConnection) -> BoxFuture<'static, HookResult<T>> + Send + Sync>;
type ObserveFn = Arc<dyn Fn(Event, SharedConnection) -> BoxFuture<'static, HookResult<()>> + Send + Sync>;

/// Interceptor assembled from closures.
///
/// # Examples
///
/// ```rust
/// use smock_core::connection::Payload;
/// use smock_core::interceptor::{FnInterceptor, Inbound};
///
/// let upper = FnInterceptor::new(|url| url == "wss://x")
///     .named("upper")
///     .on_message(|payload, _conn| async move {
///         Ok(Inbound::Forward(payload.map_text(|t| t.to_uppercase())))
///     });
/// ```
#[derive(Clone)]
pub struct FnInterceptor {
    name: String,
    matcher: MatchFn,
    open: Option<ObserveFn>,
    message: Option<TransformFn<Inbound>>,
    send: Option<TransformFn<Payload>>,
    error: Option<ObserveFn>,
    close: Option<ObserveFn>,
}

impl FnInterceptor {
    /// Interceptor with the given URL predicate and no hooks.
    pub fn new(matcher: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: "anonymous".to_string(),
            matcher: Arc::new(matcher),
            open: None,
            message: None,
            send: None,
            error: None,
            close: None,
        }
    }

    /// Interceptor matching every URL.
    pub fn any() -> Self {
        Self::new(|_| true)
    }

    /// Set the name used in logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the `open` hook.
    pub fn on_open<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Event, SharedConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<()>> + Send + 'static,
    {
        self.open = Some(Arc::new(move |event, conn| Box::pin(hook(event, conn))));
        self
    }

    /// Set the inbound message hook.
    pub fn on_message<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Payload, SharedConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<Inbound>> + Send + 'static,
    {
        self.message = Some(Arc::new(move |payload, conn| Box::pin(hook(payload, conn))));
        self
    }

    /// Set the outbound hook.
    pub fn on_send<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Payload, SharedConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<Payload>> + Send + 'static,
    {
        self.send = Some(Arc::new(move |payload, conn| Box::pin(hook(payload, conn))));
        self
    }

    /// Set the `error` hook.
    pub fn on_error<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Event, SharedConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<()>> + Send + 'static,
    {
        self.error = Some(Arc::new(move |event, conn| Box::pin(hook(event, conn))));
        self
    }

    /// Set the `close` hook.
    pub fn on_close<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Event, SharedConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<()>> + Send + 'static,
    {
        self.close = Some(Arc::new(move |event, conn| Box::pin(hook(event, conn))));
        self
    }
}

impl std::fmt::Debug for FnInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInterceptor")
            .field("name", &self.name)
            .field("open", &self.open.is_some())
            .field("message", &self.message.is_some())
            .field("send", &self.send.is_some())
            .field("error", &self.error.is_some())
            .field("close", &self.close.is_some())
            .finish()
    }
}

#[async_trait]
impl Interceptor for FnInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, url: &str) -> bool {
        (self.matcher)(url)
    }

    async fn on_open(&self, event: &Event, connection: &SharedConnection) -> HookResult<()> {
        match &self.open {
            Some(hook) => hook(event.clone(), connection.clone()).await,
            None => Ok(()),
        }
    }

    async fn on_message(&self, payload: Payload, connection: &SharedConnection) -> HookResult<Inbound> {
        match &self.message {
            Some(hook) => hook(payload, connection.clone()).await,
            None => Ok(Inbound::Forward(payload)),
        }
    }

    async fn on_send(&self, payload: Payload, connection: &SharedConnection) -> HookResult<Payload> {
        match &self.send {
            Some(hook) => hook(payload, connection.clone()).await,
            None => Ok(payload),
        }
    }

    async fn on_error(&self, event: &Event, connection: &SharedConnection) -> HookResult<()> {
        match &self.error {
            Some(hook) => hook(event.clone(), connection.clone()).await,
            None => Ok(()),
        }
    }

    async fn on_close(&self, event: &Event, connection: &SharedConnection) -> HookResult<()> {
        match &self.close {
            Some(hook) => hook(event.clone(), connection.clone()).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectOptions, MemoryConnection};

    fn connection() -> SharedConnection {
        Arc::new(MemoryConnection::new("wss://x", ConnectOptions::default()))
    }

    #[tokio::test]
    async fn test_fn_interceptor_defaults_pass_through() {
        let interceptor = FnInterceptor::any();
        let conn = connection();

        assert!(interceptor.matches("wss://anything"));
        assert_eq!(
            Interceptor::on_send(&interceptor, Payload::text("a"), &conn).await.unwrap(),
            Payload::text("a")
        );
        assert_eq!(
            Interceptor::on_message(&interceptor, Payload::text("b"), &conn).await.unwrap(),
            Inbound::Forward(Payload::text("b"))
        );
        assert!(Interceptor::on_close(&interceptor, &Event::close(1000, "", true), &conn).await.is_ok());
    }

    #[tokio::test]
    async fn test_fn_interceptor_hooks_receive_connection() {
        let interceptor = FnInterceptor::new(|url| url.ends_with("/feed"))
            .named("tagger")
            .on_send(|payload, conn| async move {
                let url = conn.url();
                Ok(payload.map_text(|t| format!("{}@{}", t, url)))
            });

        assert_eq!(interceptor.name(), "tagger");
        assert!(!interceptor.matches("wss://x"));
        let out = Interceptor::on_send(&interceptor, Payload::text("hi"), &connection())
            .await
            .unwrap();
        assert_eq!(out, Payload::text("hi@wss://x"));
    }

    #[test]
    fn test_stats_running_average() {
        let mut stats = InterceptorStats::default();
        stats.record(std::time::Duration::from_millis(2), true, false);
        stats.record(std::time::Duration::from_millis(4), false, true);

        assert_eq!(stats.total_intercepted, 2);
        assert_eq!(stats.total_modified, 1);
        assert_eq!(stats.total_dropped, 1);
        assert!((stats.avg_processing_time_ms - 3.0).abs() < 1e-9);
        assert!(stats.last_processed.is_some());
    }
}
