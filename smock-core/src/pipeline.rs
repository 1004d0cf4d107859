//! Transform pipelines.
//!
//! A pipeline folds one kind of hook over a payload, in the order the bound
//! interceptors were registered: the first hook sees the original payload and
//! each later hook sees its predecessor's output.
//!
//! A hook that returns an error or panics aborts the fold. The message then
//! continues with the original, untransformed payload; nothing is lost and
//! nothing is surfaced to the application beyond a `warn!` log.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::connection::{Event, EventType, Payload, SharedConnection};
use crate::error::HookError;
use crate::interceptor::{HookResult, Inbound, Interceptor};

/// Result of the outbound pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundOutcome {
    /// Every hook ran; this is the final payload
    Transformed(Payload),
    /// A hook failed; the original payload is used
    Fallback {
        /// The original payload
        payload: Payload,
        /// What went wrong
        error: HookError,
    },
}

impl OutboundOutcome {
    /// The payload to hand to the real connection.
    pub fn into_payload(self) -> Payload {
        match self {
            OutboundOutcome::Transformed(payload) => payload,
            OutboundOutcome::Fallback { payload, .. } => payload,
        }
    }
}

/// Result of the inbound pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Every hook ran; deliver this payload
    Deliver(Payload),
    /// A hook asked for the message to be dropped
    Dropped {
        /// Name of the interceptor that dropped it
        by: String,
    },
    /// A hook failed; the original payload is delivered
    Fallback {
        /// The original payload
        payload: Payload,
        /// What went wrong
        error: HookError,
    },
}

/// Await a hook, converting both errors and panics into [`HookError`].
pub async fn guard_hook<T, F>(interceptor: &str, hook: &'static str, future: F) -> Result<T, HookError>
where
    F: Future<Output = HookResult<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(HookError {
            interceptor: interceptor.to_string(),
            hook,
            reason: format!("{:#}", e),
        }),
        Err(panic) => Err(HookError {
            interceptor: interceptor.to_string(),
            hook,
            reason: format!("panicked: {}", panic_message(panic.as_ref())),
        }),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Fold `on_send` hooks over `payload`.
pub async fn run_outbound(
    interceptors: &[Arc<dyn Interceptor>],
    payload: Payload,
    connection: &SharedConnection,
) -> OutboundOutcome {
    let mut current = payload.clone();

    for interceptor in interceptors {
        let name = interceptor.name();
        match guard_hook(name, "send", interceptor.on_send(current, connection)).await {
            Ok(next) => current = next,
            Err(error) => {
                tracing::warn!("Error modifying outgoing message: {}", error);
                return OutboundOutcome::Fallback { payload, error };
            }
        }
    }

    OutboundOutcome::Transformed(current)
}

/// Fold `on_message` hooks over `payload`.
pub async fn run_inbound(
    interceptors: &[Arc<dyn Interceptor>],
    payload: Payload,
    connection: &SharedConnection,
) -> InboundOutcome {
    let mut current = payload.clone();

    for interceptor in interceptors {
        let name = interceptor.name();
        match guard_hook(name, "message", interceptor.on_message(current, connection)).await {
            Ok(Inbound::Forward(next)) => current = next,
            Ok(Inbound::Drop) => {
                tracing::debug!("Interceptor '{}' dropped an inbound message", name);
                return InboundOutcome::Dropped {
                    by: name.to_string(),
                };
            }
            Err(error) => {
                tracing::warn!("Error modifying incoming message: {}", error);
                return InboundOutcome::Fallback { payload, error };
            }
        }
    }

    InboundOutcome::Deliver(current)
}

/// Run the lifecycle hook matching `event` on every interceptor.
///
/// Unlike the transform pipelines, a failing hook does not stop the others;
/// every failure is logged and returned.
pub async fn run_lifecycle(
    interceptors: &[Arc<dyn Interceptor>],
    event: &Event,
    connection: &SharedConnection,
) -> Vec<HookError> {
    let mut failures = Vec::new();

    for interceptor in interceptors {
        let name = interceptor.name();
        let result = match event.event_type {
            EventType::Open => guard_hook(name, "open", interceptor.on_open(event, connection)).await,
            EventType::Error => {
                guard_hook(name, "error", interceptor.on_error(event, connection)).await
            }
            EventType::Close => {
                guard_hook(name, "close", interceptor.on_close(event, connection)).await
            }
            _ => Ok(()),
        };

        if let Err(error) = result {
            tracing::warn!("Lifecycle hook failed: {}", error);
            failures.push(error);
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectOptions, MemoryConnection};
    use crate::interceptor::FnInterceptor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn connection() -> SharedConnection {
        Arc::new(MemoryConnection::new("wss://x", ConnectOptions::default()))
    }

    fn explode() -> HookResult<Inbound> {
        panic!("hook exploded")
    }

    fn suffix(tag: &'static str) -> Arc<dyn Interceptor> {
        Arc::new(
            FnInterceptor::any()
                .named(tag)
                .on_send(move |p, _| async move { Ok(p.map_text(|t| format!("{}{}", t, tag))) })
                .on_message(move |p, _| async move {
                    Ok(Inbound::Forward(p.map_text(|t| format!("{}{}", t, tag))))
                }),
        )
    }

    #[tokio::test]
    async fn test_outbound_chains_in_order() {
        let chain = vec![suffix("1"), suffix("2")];
        let outcome = run_outbound(&chain, Payload::text("x"), &connection()).await;
        assert_eq!(outcome, OutboundOutcome::Transformed(Payload::text("x12")));
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let outcome = run_inbound(&[], Payload::text("x"), &connection()).await;
        assert_eq!(outcome, InboundOutcome::Deliver(Payload::text("x")));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_outbound_failure_falls_back_to_original() {
        let later_calls = Arc::new(AtomicUsize::new(0));
        let counter = later_calls.clone();
        let chain: Vec<Arc<dyn Interceptor>> = vec![
            suffix("1"),
            Arc::new(
                FnInterceptor::any()
                    .named("broken")
                    .on_send(|_, _| async { Err(anyhow::anyhow!("bad transform")) }),
            ),
            Arc::new(FnInterceptor::any().on_send(move |p, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(p) }
            })),
        ];

        let outcome = run_outbound(&chain, Payload::text("x"), &connection()).await;

        match outcome {
            OutboundOutcome::Fallback { payload, error } => {
                assert_eq!(payload, Payload::text("x"));
                assert_eq!(error.interceptor, "broken");
                assert_eq!(error.hook, "send");
            }
            other => panic!("expected fallback, got {:?}", other),
        }
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        assert!(logs_contain("Error modifying outgoing message"));
    }

    #[tokio::test]
    async fn test_panicking_hook_is_a_failure() {
        let chain: Vec<Arc<dyn Interceptor>> = vec![Arc::new(
            FnInterceptor::any()
                .named("panics")
                .on_message(|_, _| async { explode() }),
        )];

        let outcome = run_inbound(&chain, Payload::text("hi"), &connection()).await;

        match outcome {
            InboundOutcome::Fallback { payload, error } => {
                assert_eq!(payload, Payload::text("hi"));
                assert!(error.reason.contains("hook exploded"));
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inbound_drop_stops_the_fold() {
        let chain: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(
                FnInterceptor::any()
                    .named("dropper")
                    .on_message(|_, _| async { Ok(Inbound::Drop) }),
            ),
            suffix("never"),
        ];

        let outcome = run_inbound(&chain, Payload::text("x"), &connection()).await;
        assert_eq!(
            outcome,
            InboundOutcome::Dropped {
                by: "dropper".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_lifecycle_failures_do_not_stop_other_hooks() {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();
        let chain: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(
                FnInterceptor::any()
                    .named("grumpy")
                    .on_close(|_, _| async { Err(anyhow::anyhow!("no")) }),
            ),
            Arc::new(FnInterceptor::any().on_close(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })),
        ];

        let failures =
            run_lifecycle(&chain, &Event::close(1000, "", true), &connection()).await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].hook, "close");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
