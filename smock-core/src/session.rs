//! The delegation wrapper handed to application code in place of a real connection.
//!
//! A [`Session`] owns exactly one real connection and binds, once and for
//! good, the interceptors whose URL predicate matched at construction. It
//! implements [`Connection`] itself: `send`, `close` and the two listener
//! methods are intercepted, everything else is forwarded verbatim.
//!
//! Inbound messages are rewritten by *forwarding listeners*: for every
//! application listener registered for `message`, the session registers an
//! internal listener on the real connection that queues events to a task.
//! The task runs each event through the inbound pipeline, one at a time, and
//! hands the rewritten event to the application listener. A listener that
//! panics is logged and keeps receiving later messages. Listeners for any
//! other event type are forwarded the original event synchronously.
//!
//! Outbound payloads go through the pipeline one at a time: a `send` waits
//! for the previous one to reach the real connection, so concurrent sends
//! keep their call order.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{EmptyPayloadPolicy, SessionConfig};
use crate::connection::{
    BinaryType, ConnectOptions, Connection, Connector, Event, EventListener, EventType, Payload,
    ReadyState, SharedConnection,
};
use crate::error::{SmockError, SmockResult};
use crate::interceptor::Interceptor;
use crate::pipeline::{self, InboundOutcome, OutboundOutcome};
use crate::registry::InterceptorRegistry;

/// Counters describing what a session did with its traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Payloads passed to `send`
    pub messages_sent: u64,
    /// Message events taken in by forwarding listeners
    pub messages_received: u64,
    /// Message events handed to application listeners
    pub messages_delivered: u64,
    /// Message events withheld because their payload ended up empty
    pub messages_suppressed: u64,
    /// Message events dropped by an interceptor
    pub messages_dropped: u64,
    /// Transform hooks that failed (send or message)
    pub hook_failures: u64,
    /// Lifecycle hooks that failed
    pub lifecycle_hook_failures: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_delivered: AtomicU64,
    messages_suppressed: AtomicU64,
    messages_dropped: AtomicU64,
    hook_failures: AtomicU64,
    lifecycle_hook_failures: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_suppressed: self.messages_suppressed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            hook_failures: self.hook_failures.load(Ordering::Relaxed),
            lifecycle_hook_failures: self.lifecycle_hook_failures.load(Ordering::Relaxed),
        }
    }
}

/// An application listener and the forwarding listener standing in for it.
struct Binding {
    original: EventListener,
    forwarding: EventListener,
}

const LIFECYCLE_TYPES: [EventType; 3] = [EventType::Open, EventType::Error, EventType::Close];

/// Interception wrapper around one real connection.
pub struct Session {
    id: Uuid,
    inner: SharedConnection,
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    config: SessionConfig,
    bindings: Mutex<HashMap<EventType, Vec<Binding>>>,
    lifecycle: EventListener,
    terminated: Arc<AtomicBool>,
    stats: Arc<StatsCounters>,
    runtime: Handle,
    span: tracing::Span,
    /// Held from the outbound pipeline until the real `send` returns
    send_lock: tokio::sync::Mutex<()>,
}

impl Session {
    /// Bind matching interceptors and open the real connection.
    ///
    /// The bound interceptor list is computed from `registry` before the
    /// connection is opened and never changes afterwards. The real
    /// connection is opened through `connector` with `url` and `options`
    /// untouched.
    ///
    /// # Errors
    ///
    /// * `SmockError::NoRuntime` - called outside of a Tokio runtime
    /// * any error returned by `connector`
    pub fn open(
        registry: &InterceptorRegistry,
        connector: &dyn Connector,
        url: &str,
        options: ConnectOptions,
        config: SessionConfig,
    ) -> SmockResult<Self> {
        let runtime = Handle::try_current().map_err(|e| SmockError::NoRuntime {
            reason: e.to_string(),
        })?;

        let interceptors: Arc<[Arc<dyn Interceptor>]> = registry.bind(url).into();
        let inner = connector.connect(url, options)?;

        let id = Uuid::new_v4();
        let span = tracing::info_span!("session", id = %id, url = %url);
        tracing::debug!(
            parent: &span,
            "Opened {} connection with {} bound interceptor(s)",
            connector.name(),
            interceptors.len()
        );

        let terminated = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(StatsCounters::default());
        let lifecycle = spawn_lifecycle_observer(
            &runtime,
            &span,
            Arc::downgrade(&inner),
            interceptors.clone(),
            terminated.clone(),
            stats.clone(),
        );
        for event_type in LIFECYCLE_TYPES {
            inner.add_event_listener(event_type, lifecycle.clone());
        }

        Ok(Self {
            id,
            inner,
            interceptors,
            config,
            bindings: Mutex::new(HashMap::new()),
            lifecycle,
            terminated,
            stats,
            runtime,
            span,
            send_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Unique id of this session (also recorded on its tracing span).
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The real connection this session owns.
    pub fn inner(&self) -> &SharedConnection {
        &self.inner
    }

    /// Names of the bound interceptors, in application order.
    pub fn bound_interceptors(&self) -> Vec<String> {
        self.interceptors
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    /// Configuration the session was opened with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the real connection has closed or failed.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// Number of application listeners currently bound for `event_type`.
    pub fn listener_count(&self, event_type: &EventType) -> usize {
        self.bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }

    fn forwarding_listener(&self, event_type: &EventType, listener: EventListener) -> EventListener {
        if *event_type != EventType::Message {
            return EventListener::function(move |event| listener.invoke(event));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let connection = Arc::downgrade(&self.inner);
        let interceptors = self.interceptors.clone();
        let stats = self.stats.clone();
        let policy = self.config.empty_payload;
        let log_payloads = self.config.log_payloads;

        self.runtime.spawn(
            async move {
                while let Some(event) = rx.recv().await {
                    StatsCounters::bump(&stats.messages_received);

                    let Some(data) = event.data.clone() else {
                        if deliver(&listener, &event) {
                            StatsCounters::bump(&stats.messages_delivered);
                        }
                        continue;
                    };
                    let Some(connection) = connection.upgrade() else {
                        break;
                    };

                    let payload = match pipeline::run_inbound(&interceptors, data, &connection).await {
                        InboundOutcome::Deliver(payload) => payload,
                        InboundOutcome::Dropped { .. } => {
                            StatsCounters::bump(&stats.messages_dropped);
                            continue;
                        }
                        InboundOutcome::Fallback { payload, .. } => {
                            StatsCounters::bump(&stats.hook_failures);
                            payload
                        }
                    };
                    drop(connection);

                    if payload.is_empty() && policy == EmptyPayloadPolicy::Suppress {
                        tracing::debug!("Suppressing inbound message with empty payload");
                        StatsCounters::bump(&stats.messages_suppressed);
                        continue;
                    }

                    if log_payloads {
                        tracing::debug!("Delivering inbound message: {}", payload.preview(120));
                    }
                    if deliver(&listener, &event.with_data(payload)) {
                        StatsCounters::bump(&stats.messages_delivered);
                    }
                }
                tracing::debug!("Message forwarding task finished");
            }
            .instrument(self.span.clone()),
        );

        EventListener::function(move |event| {
            if tx.send(event.clone()).is_err() {
                tracing::debug!("Message forwarding task is gone, dropping event");
            }
        })
    }
}

/// Invoke an application listener, containing any panic it raises.
fn deliver(listener: &EventListener, event: &Event) -> bool {
    match std::panic::catch_unwind(AssertUnwindSafe(|| listener.invoke(event))) {
        Ok(()) => true,
        Err(panic) => {
            tracing::warn!(
                "Message listener panicked: {}",
                pipeline::panic_message(panic.as_ref())
            );
            false
        }
    }
}

/// Register the internal observer that runs lifecycle hooks and tracks termination.
fn spawn_lifecycle_observer(
    runtime: &Handle,
    span: &tracing::Span,
    connection: Weak<dyn Connection>,
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    terminated: Arc<AtomicBool>,
    stats: Arc<StatsCounters>,
) -> EventListener {
    if interceptors.is_empty() {
        return EventListener::function(move |event| {
            if matches!(event.event_type, EventType::Close | EventType::Error) {
                terminated.store(true, Ordering::SeqCst);
            }
        });
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    runtime.spawn(
        async move {
            while let Some(event) = rx.recv().await {
                let Some(connection) = connection.upgrade() else {
                    break;
                };
                let failures = pipeline::run_lifecycle(&interceptors, &event, &connection).await;
                stats
                    .lifecycle_hook_failures
                    .fetch_add(failures.len() as u64, Ordering::Relaxed);
            }
        }
        .instrument(span.clone()),
    );

    EventListener::function(move |event| {
        if matches!(event.event_type, EventType::Close | EventType::Error) {
            terminated.store(true, Ordering::SeqCst);
        }
        let _ = tx.send(event.clone());
    })
}

#[async_trait]
impl Connection for Session {
    fn url(&self) -> String {
        self.inner.url()
    }

    fn protocol(&self) -> String {
        self.inner.protocol()
    }

    fn extensions(&self) -> String {
        self.inner.extensions()
    }

    fn ready_state(&self) -> ReadyState {
        self.inner.ready_state()
    }

    fn buffered_amount(&self) -> u64 {
        self.inner.buffered_amount()
    }

    fn binary_type(&self) -> BinaryType {
        self.inner.binary_type()
    }

    fn set_binary_type(&self, binary_type: BinaryType) {
        self.inner.set_binary_type(binary_type);
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.inner.property(name)
    }

    fn set_property(&self, name: &str, value: Value) -> SmockResult<()> {
        self.inner.set_property(name, value)
    }

    async fn send(&self, payload: Payload) -> SmockResult<()> {
        StatsCounters::bump(&self.stats.messages_sent);
        let _in_order = self.send_lock.lock().await;

        if self.interceptors.is_empty() || self.inner.ready_state().is_terminal() {
            return self.inner.send(payload).await;
        }

        let outcome = pipeline::run_outbound(&self.interceptors, payload, &self.inner)
            .instrument(self.span.clone())
            .await;
        if let OutboundOutcome::Fallback { .. } = outcome {
            StatsCounters::bump(&self.stats.hook_failures);
        }

        let payload = outcome.into_payload();
        if self.config.log_payloads {
            tracing::debug!(parent: &self.span, "Sending: {}", payload.preview(120));
        }
        self.inner.send(payload).await
    }

    async fn close(&self, code: Option<u16>, reason: Option<String>) -> SmockResult<()> {
        self.inner.close(code, reason).await
    }

    fn add_event_listener(&self, event_type: EventType, listener: EventListener) {
        let forwarding = {
            let mut bindings = self.bindings.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = bindings.entry(event_type.clone()).or_default();
            if entry.iter().any(|b| b.original.same(&listener)) {
                tracing::debug!(parent: &self.span, "Ignoring duplicate '{}' listener", event_type);
                return;
            }

            let forwarding = self.forwarding_listener(&event_type, listener.clone());
            entry.push(Binding {
                original: listener,
                forwarding: forwarding.clone(),
            });
            forwarding
        };

        self.inner.add_event_listener(event_type, forwarding);
    }

    fn remove_event_listener(&self, event_type: &EventType, listener: &EventListener) {
        let removed = {
            let mut bindings = self.bindings.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = bindings.get_mut(event_type) else {
                return;
            };
            let Some(position) = entry.iter().position(|b| b.original.same(listener)) else {
                return;
            };
            let binding = entry.remove(position);
            if entry.is_empty() {
                bindings.remove(event_type);
            }
            binding
        };

        self.inner
            .remove_event_listener(event_type, &removed.forwarding);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for event_type in LIFECYCLE_TYPES {
            self.inner.remove_event_listener(&event_type, &self.lifecycle);
        }

        let bindings = std::mem::take(
            self.bindings
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (event_type, entries) in bindings {
            for binding in entries {
                self.inner
                    .remove_event_listener(&event_type, &binding.forwarding);
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("url", &self.inner.url())
            .field("interceptors", &self.bound_interceptors())
            .field("ready_state", &self.inner.ready_state())
            .finish()
    }
}
