//! In-process connection implementation.
//!
//! The remote side of a `MemoryConnection` is driven from code: `open`,
//! `receive`, `fail` and `remote_close` dispatch the same events a network
//! connection would, and everything the local side sends is recorded. This
//! makes it the connection of choice for tests and for rehearsing an
//! interceptor set without a server.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    validate_close_code, validate_url, BinaryType, ConnectOptions, Connection, ConnectionState,
    Connector, Event, EventListener, EventTarget, EventType, Payload, ReadyState, SharedConnection,
};
use crate::error::{ConnectionError, SmockResult};

/// A recorded call to `close`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseCall {
    /// Code passed by the caller
    pub code: Option<u16>,
    /// Reason passed by the caller
    pub reason: Option<String>,
}

/// Connection whose remote side is scripted.
#[derive(Debug)]
pub struct MemoryConnection {
    state: ConnectionState,
    target: EventTarget,
    options: ConnectOptions,
    sent: Mutex<Vec<Payload>>,
    close_calls: Mutex<Vec<CloseCall>>,
}

impl MemoryConnection {
    /// Create a connection in the `Connecting` state.
    pub fn new(url: impl Into<String>, options: ConnectOptions) -> Self {
        Self {
            state: ConnectionState::new(url),
            target: EventTarget::new(),
            options,
            sent: Mutex::new(Vec::new()),
            close_calls: Mutex::new(Vec::new()),
        }
    }

    /// Options the connection was opened with.
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Complete the handshake: selects the first requested subprotocol and dispatches `open`.
    pub fn open(&self) {
        if let Some(protocol) = self.options.protocols.first() {
            self.state.set_protocol(protocol.clone());
        }
        self.state.set_ready_state(ReadyState::Open);
        self.target.dispatch(&Event::open());
    }

    /// Deliver a message from the remote side.
    pub fn receive(&self, payload: impl Into<Payload>) {
        let event = Event::message(payload, self.state.url());
        self.target.dispatch(&event);
    }

    /// Dispatch an arbitrary event as if the host produced it.
    pub fn dispatch(&self, event: &Event) {
        self.target.dispatch(event);
    }

    /// Fail the connection: dispatches `error` followed by an unclean `close` (1006).
    pub fn fail(&self, description: impl Into<String>) {
        self.state.set_ready_state(ReadyState::Closed);
        self.target.dispatch(&Event::error(description));
        self.target.dispatch(&Event::close(1006, "", false));
    }

    /// Close initiated by the remote side.
    pub fn remote_close(&self, code: u16, reason: impl Into<String>) {
        self.state.set_ready_state(ReadyState::Closed);
        self.target.dispatch(&Event::close(code, reason, true));
    }

    /// Every payload handed to `send` while open, in order.
    pub fn sent(&self) -> Vec<Payload> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every call to `close`, in order.
    pub fn close_calls(&self) -> Vec<CloseCall> {
        self.close_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of listeners currently registered for `event_type`.
    pub fn listener_count(&self, event_type: &EventType) -> usize {
        self.target.count(event_type)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn url(&self) -> String {
        self.state.url().to_string()
    }

    fn protocol(&self) -> String {
        self.state.protocol()
    }

    fn extensions(&self) -> String {
        self.state.extensions()
    }

    fn ready_state(&self) -> ReadyState {
        self.state.ready_state()
    }

    fn buffered_amount(&self) -> u64 {
        self.state.buffered_amount()
    }

    fn binary_type(&self) -> BinaryType {
        self.state.binary_type()
    }

    fn set_binary_type(&self, binary_type: BinaryType) {
        self.state.set_binary_type(binary_type);
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.state.property(name)
    }

    fn set_property(&self, name: &str, value: Value) -> SmockResult<()> {
        self.state.set_property(name, value)
    }

    async fn send(&self, payload: Payload) -> SmockResult<()> {
        match self.state.ready_state() {
            ReadyState::Connecting => Err(ConnectionError::InvalidState {
                operation: "send".to_string(),
                state: ReadyState::Connecting.to_string(),
            }
            .into()),
            ReadyState::Open => {
                self.sent
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(payload);
                Ok(())
            }
            state => {
                tracing::debug!("Discarding {} byte payload, connection is {}", payload.len(), state);
                Ok(())
            }
        }
    }

    async fn close(&self, code: Option<u16>, reason: Option<String>) -> SmockResult<()> {
        validate_close_code(code)?;
        self.close_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CloseCall {
                code,
                reason: reason.clone(),
            });

        if self.state.ready_state().is_terminal() {
            return Ok(());
        }

        let was_open = self.state.ready_state() == ReadyState::Open;
        self.state.set_ready_state(ReadyState::Closed);
        let event = if was_open {
            Event::close(code.unwrap_or(1005), reason.unwrap_or_default(), true)
        } else {
            Event::close(1006, "", false)
        };
        self.target.dispatch(&event);
        Ok(())
    }

    fn add_event_listener(&self, event_type: EventType, listener: EventListener) {
        self.target.add(event_type, listener);
    }

    fn remove_event_listener(&self, event_type: &EventType, listener: &EventListener) {
        self.target.remove(event_type, listener);
    }
}

/// Connector producing [`MemoryConnection`]s and keeping a handle to each.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    connections: Mutex<Vec<Arc<MemoryConnection>>>,
}

impl MemoryConnector {
    /// Create a connector with no connections yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// All connections opened so far, in order.
    pub fn connections(&self) -> Vec<Arc<MemoryConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recently opened connection.
    pub fn last(&self) -> Option<Arc<MemoryConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &str, options: ConnectOptions) -> SmockResult<SharedConnection> {
        validate_url(url)?;
        let connection = Arc::new(MemoryConnection::new(url, options));
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(connection.clone());
        Ok(connection)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_send_requires_open() {
        let connection = MemoryConnection::new("wss://x", ConnectOptions::default());
        assert!(connection.send(Payload::text("early")).await.is_err());

        connection.open();
        connection.send(Payload::text("hello")).await.unwrap();
        assert_eq!(connection.sent(), vec![Payload::text("hello")]);
    }

    #[tokio::test]
    async fn test_send_after_close_is_discarded() {
        let connection = MemoryConnection::new("wss://x", ConnectOptions::default());
        connection.open();
        connection.close(Some(1000), Some("bye".to_string())).await.unwrap();

        connection.send(Payload::text("late")).await.unwrap();
        assert!(connection.sent().is_empty());
        assert_eq!(connection.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn test_close_dispatches_event_with_arguments() {
        let connection = MemoryConnection::new("wss://x", ConnectOptions::default());
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        connection.add_event_listener(
            EventType::Close,
            EventListener::function(move |event| {
                *seen_clone.lock().unwrap() = event.close.clone();
            }),
        );

        connection.open();
        connection.close(Some(4000), Some("done".to_string())).await.unwrap();

        let close = seen.lock().unwrap().clone().unwrap();
        assert_eq!(close.code, 4000);
        assert_eq!(close.reason, "done");
        assert!(close.was_clean);
        assert_eq!(
            connection.close_calls(),
            vec![CloseCall {
                code: Some(4000),
                reason: Some("done".to_string())
            }]
        );
    }

    #[tokio::test]
    async fn test_close_rejects_reserved_code() {
        let connection = MemoryConnection::new("wss://x", ConnectOptions::default());
        connection.open();
        assert!(connection.close(Some(1006), None).await.is_err());
        assert_eq!(connection.ready_state(), ReadyState::Open);
    }

    #[test]
    fn test_fail_dispatches_error_then_close() {
        let connection = MemoryConnection::new("wss://x", ConnectOptions::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        for event_type in [EventType::Error, EventType::Close] {
            let order = order.clone();
            connection.add_event_listener(
                event_type,
                EventListener::function(move |event| {
                    order.lock().unwrap().push(event.event_type.clone());
                }),
            );
        }

        connection.fail("reset by peer");
        assert_eq!(*order.lock().unwrap(), vec![EventType::Error, EventType::Close]);
    }

    #[test]
    fn test_open_selects_first_protocol() {
        let options = ConnectOptions::new().with_protocol("v2").with_protocol("v1");
        let connection = MemoryConnection::new("wss://x", options);
        connection.open();
        assert_eq!(connection.protocol(), "v2");
        assert_eq!(connection.ready_state(), ReadyState::Open);
    }

    #[test]
    fn test_connector_tracks_connections() {
        let connector = MemoryConnector::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let shared = connector.connect("wss://a", ConnectOptions::default()).unwrap();
        connector.connect("wss://b", ConnectOptions::default()).unwrap();
        assert!(connector.connect("http://c", ConnectOptions::default()).is_err());

        assert_eq!(connector.connections().len(), 2);
        assert_eq!(connector.last().unwrap().url(), "wss://b");

        let calls_clone = calls.clone();
        shared.add_event_listener(
            EventType::Message,
            EventListener::function(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        connector.connections()[0].receive("ping");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
