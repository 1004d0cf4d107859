//! WebSocket connection implementation over `tokio-tungstenite`.
//!
//! Construction returns immediately in the `Connecting` state. A single I/O
//! task per connection performs the handshake and then multiplexes outbound
//! commands with inbound frames, dispatching `open`, `message`, `error` and
//! `close` events to registered listeners.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::{
    validate_close_code, validate_url, BinaryType, ConnectOptions, Connection, ConnectionState,
    Connector, Event, EventListener, EventTarget, EventType, Payload, ReadyState, SharedConnection,
};
use crate::error::{ConnectionError, SmockError, SmockResult};

/// Commands sent from the connection handle to its I/O task.
#[derive(Debug)]
enum Command {
    Send(Payload),
    Close(Option<CloseFrame>),
}

/// State shared between the handle and the I/O task.
struct Shared {
    state: ConnectionState,
    target: EventTarget,
}

impl Shared {
    fn fail(&self, error: ConnectionError) {
        tracing::warn!("WebSocket {} failed: {}", self.state.url(), error);
        self.state.set_ready_state(ReadyState::Closed);
        self.target.dispatch(&Event::error(error.to_string()));
        self.target.dispatch(&Event::close(1006, "", false));
    }
}

/// A network WebSocket connection.
pub struct WebSocketConnection {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl WebSocketConnection {
    /// Start connecting to `url`.
    ///
    /// Must be called from within a Tokio runtime; the handshake runs on a
    /// spawned task.
    pub fn connect(url: &str, options: ConnectOptions) -> SmockResult<Self> {
        validate_url(url)?;
        let request = build_request(url, &options)?;
        let handle = tokio::runtime::Handle::try_current().map_err(|e| SmockError::NoRuntime {
            reason: e.to_string(),
        })?;

        let shared = Arc::new(Shared {
            state: ConnectionState::new(url),
            target: EventTarget::new(),
        });
        let (commands, receiver) = mpsc::unbounded_channel();

        tracing::debug!("Connecting WebSocket to {}", url);
        handle.spawn(run_io(
            shared.clone(),
            request,
            options.connect_timeout,
            receiver,
        ));

        Ok(Self { shared, commands })
    }
}

fn build_request(url: &str, options: &ConnectOptions) -> SmockResult<Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ConnectionError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let invalid_header = |reason: String| ConnectionError::HandshakeFailed {
        url: url.to_string(),
        reason,
    };

    if !options.protocols.is_empty() {
        let value = HeaderValue::from_str(&options.protocols.join(", "))
            .map_err(|e| invalid_header(format!("invalid subprotocol list: {}", e)))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", value);
    }

    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| invalid_header(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| invalid_header(format!("invalid value for header '{}': {}", name, e)))?;
        request.headers_mut().insert(name, value);
    }

    Ok(request)
}

/// Wait until the handle asks to close (or goes away) while still connecting.
async fn close_requested(commands: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Close(_)) | None => return,
            // sends are rejected while connecting, nothing else can arrive
            Some(Command::Send(_)) => continue,
        }
    }
}

async fn run_io(
    shared: Arc<Shared>,
    request: Request,
    connect_timeout: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let url = shared.state.url().to_string();

    let connected = tokio::select! {
        result = tokio::time::timeout(connect_timeout, connect_async(request)) => result,
        _ = close_requested(&mut commands) => {
            shared.fail(ConnectionError::Closed {
                reason: "closed before the connection was established".to_string(),
            });
            return;
        }
    };

    let (stream, response) = match connected {
        Ok(Ok(established)) => established,
        Ok(Err(e)) => {
            shared.fail(ConnectionError::HandshakeFailed {
                url,
                reason: e.to_string(),
            });
            return;
        }
        Err(_) => {
            shared.fail(ConnectionError::Timeout {
                url,
                timeout_ms: connect_timeout.as_millis() as u64,
            });
            return;
        }
    };

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    if let Some(protocol) = header("sec-websocket-protocol") {
        shared.state.set_protocol(protocol);
    }
    if let Some(extensions) = header("sec-websocket-extensions") {
        shared.state.set_extensions(extensions);
    }

    shared.state.set_ready_state(ReadyState::Open);
    tracing::info!("WebSocket connected to {}", url);
    shared.target.dispatch(&Event::open());

    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(payload)) => {
                    let len = payload.len() as u64;
                    let message = match payload {
                        Payload::Text(text) => Message::Text(text.into()),
                        Payload::Binary(data) => Message::Binary(data),
                    };
                    let result = sink.send(message).await;
                    shared.state.sub_buffered(len);
                    if let Err(e) = result {
                        tracing::error!("Failed to write frame to {}: {}", url, e);
                        shared.fail(e.into());
                        break;
                    }
                }
                Some(Command::Close(frame)) => {
                    // keep reading until the peer answers the close frame
                    if let Err(e) = sink.send(Message::Close(frame)).await {
                        tracing::debug!("Failed to send close frame to {}: {}", url, e);
                    }
                }
                None => {
                    tracing::debug!("Connection handle for {} dropped, closing", url);
                    let _ = sink.send(Message::Close(None)).await;
                    shared.state.set_ready_state(ReadyState::Closed);
                    break;
                }
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let event = Event::message(Payload::Text(text.as_str().to_string()), url.clone());
                    shared.target.dispatch(&event);
                }
                Some(Ok(Message::Binary(data))) => {
                    shared.target.dispatch(&Event::message(Payload::Binary(data), url.clone()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((1005, String::new()));
                    let _ = sink.flush().await;
                    shared.state.set_ready_state(ReadyState::Closed);
                    tracing::info!("WebSocket {} closed ({} {})", url, code, reason);
                    shared.target.dispatch(&Event::close(code, reason, true));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Failed to read frame from {}: {}", url, e);
                    shared.fail(e.into());
                    break;
                }
                None => {
                    shared.state.set_ready_state(ReadyState::Closed);
                    shared.target.dispatch(&Event::close(1006, "", false));
                    break;
                }
            }
        }
    }

    tracing::debug!("WebSocket I/O task for {} finished", url);
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn url(&self) -> String {
        self.shared.state.url().to_string()
    }

    fn protocol(&self) -> String {
        self.shared.state.protocol()
    }

    fn extensions(&self) -> String {
        self.shared.state.extensions()
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.state.ready_state()
    }

    fn buffered_amount(&self) -> u64 {
        self.shared.state.buffered_amount()
    }

    fn binary_type(&self) -> BinaryType {
        self.shared.state.binary_type()
    }

    fn set_binary_type(&self, binary_type: BinaryType) {
        self.shared.state.set_binary_type(binary_type);
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.shared.state.property(name)
    }

    fn set_property(&self, name: &str, value: Value) -> SmockResult<()> {
        self.shared.state.set_property(name, value)
    }

    async fn send(&self, payload: Payload) -> SmockResult<()> {
        match self.shared.state.ready_state() {
            ReadyState::Connecting => Err(ConnectionError::InvalidState {
                operation: "send".to_string(),
                state: ReadyState::Connecting.to_string(),
            }
            .into()),
            ReadyState::Open => {
                self.shared.state.add_buffered(payload.len() as u64);
                self.commands
                    .send(Command::Send(payload))
                    .map_err(|_| ConnectionError::SendFailed {
                        reason: "I/O task is no longer running".to_string(),
                    })?;
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
        if self.shared.state.ready_state().is_terminal() {
            return Ok(());
        }

        let frame = code.map(|code| CloseFrame {
            code: CloseCode::from(code),
            reason: reason.unwrap_or_default().into(),
        });
        self.shared.state.set_ready_state(ReadyState::Closing);
        // the task may already be gone if the peer dropped us
        let _ = self.commands.send(Command::Close(frame));
        Ok(())
    }

    fn add_event_listener(&self, event_type: EventType, listener: EventListener) {
        self.shared.target.add(event_type, listener);
    }

    fn remove_event_listener(&self, event_type: &EventType, listener: &EventListener) {
        self.shared.target.remove(event_type, listener);
    }
}

/// The native connector: opens [`WebSocketConnection`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create the connector.
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, url: &str, options: ConnectOptions) -> SmockResult<SharedConnection> {
        Ok(Arc::new(WebSocketConnection::connect(url, options)?))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_request_carries_protocols_and_headers() {
        let options = ConnectOptions::new()
            .with_protocol("graphql-ws")
            .with_protocol("json")
            .with_header("X-Trace", "abc");
        let request = build_request("wss://example.test/feed", &options).unwrap();

        assert_eq!(
            request.headers().get("sec-websocket-protocol").unwrap(),
            "graphql-ws, json"
        );
        assert_eq!(request.headers().get("x-trace").unwrap(), "abc");
    }

    #[test]
    fn test_request_rejects_bad_header() {
        let options = ConnectOptions::new().with_header("bad header", "x");
        assert!(build_request("wss://example.test", &options).is_err());
    }

    #[test]
    fn test_connect_outside_runtime_fails() {
        let result = WebSocketConnection::connect("ws://127.0.0.1:9", ConnectOptions::default());
        assert!(matches!(result, Err(SmockError::NoRuntime { .. })));
    }

    #[test]
    fn test_timeout_is_reported_as_error_then_close() {
        let shared = Shared {
            state: ConnectionState::new("ws://slow.test"),
            target: EventTarget::new(),
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = EventListener::function(move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        shared.target.add(EventType::Error, listener.clone());
        shared.target.add(EventType::Close, listener);

        shared.fail(ConnectionError::Timeout {
            url: "ws://slow.test".to_string(),
            timeout_ms: 250,
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0].error.as_deref(),
            Some("Connecting to ws://slow.test timed out after 250ms")
        );
        assert_eq!(seen[1].close.as_ref().unwrap().code, 1006);
        assert_eq!(shared.state.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn test_refused_connection_dispatches_error_and_close() {
        // port 9 (discard) is not expected to accept WebSocket handshakes
        let connection = WebSocketConnection::connect(
            "ws://127.0.0.1:9",
            ConnectOptions::default().with_connect_timeout(Duration::from_secs(2)),
        )
        .unwrap();
        assert_eq!(connection.ready_state(), ReadyState::Connecting);
        assert!(connection.send(Payload::text("early")).await.is_err());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let tx = Mutex::new(tx);
        connection.add_event_listener(
            EventType::Close,
            EventListener::function(move |event| {
                let _ = tx.lock().unwrap().send(event.close.clone());
            }),
        );

        let close = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(close.code, 1006);
        assert!(!close.was_clean);
        assert_eq!(connection.ready_state(), ReadyState::Closed);
    }
}
