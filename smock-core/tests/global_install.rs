//! Process-wide installation.
//!
//! Installation is one-time per process, so the whole lifecycle is checked
//! in a single test.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use smock_core::connection::{ConnectOptions, EventListener, EventType, MemoryConnector, Payload};
use smock_core::{FnInterceptor, Inbound, SmockError};
use tokio::sync::mpsc;

#[tokio::test]
async fn test_install_lifecycle() {
    assert!(!smock_core::is_installed());
    assert_matches!(smock_core::smock(), Err(SmockError::NotInstalled));

    // not yet installed: the native connector is used, and it still validates
    assert_matches!(
        smock_core::connect("http://not-a-socket", ConnectOptions::new()),
        Err(SmockError::Connection(_))
    );

    let memory = Arc::new(MemoryConnector::new());
    let handle = smock_core::install(memory.clone()).unwrap();
    assert!(smock_core::is_installed());
    assert_matches!(
        smock_core::install(MemoryConnector::new()),
        Err(SmockError::AlreadyInstalled)
    );

    handle.use_interceptor(
        FnInterceptor::new(|url| url.starts_with("wss://chat"))
            .named("shout")
            .on_message(|p, _| async move {
                Ok(Inbound::Forward(p.map_text(|t| t.to_uppercase())))
            })
            .on_send(|p, _| async move { Ok(p.map_text(|t| format!("[{}]", t))) }),
    );
    assert_eq!(smock_core::smock().unwrap().registry().names(), vec!["shout"]);

    let connection = smock_core::connect("wss://chat.example", ConnectOptions::new()).unwrap();
    let real = memory.last().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    connection.add_event_listener(
        EventType::Message,
        EventListener::function(move |event| {
            let _ = tx.send(event.clone());
        }),
    );

    real.open();
    connection.send(Payload::text("hello")).await.unwrap();
    real.receive("welcome");

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.data, Some(Payload::text("WELCOME")));
    assert_eq!(real.sent(), vec![Payload::text("[hello]")]);

    // other hosts are wrapped too, but nothing binds to them
    let other = smock_core::connect("wss://metrics.example", ConnectOptions::new()).unwrap();
    memory.last().unwrap().open();
    other.send(Payload::text("raw")).await.unwrap();
    assert_eq!(memory.last().unwrap().sent(), vec![Payload::text("raw")]);
}

