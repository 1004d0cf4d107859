//! Installation of the interception layer.
//!
//! [`Interception`] is the self-contained form: a registry, the connector
//! used for real connections and the session configuration. It is itself a
//! [`Connector`], so code written against `&dyn Connector` can be handed an
//! interception layer without noticing.
//!
//! [`install`] puts one `Interception` behind the process-wide [`connect`]
//! function. Installation happens once and cannot be undone; connections
//! opened before it are never intercepted.

use std::sync::{Arc, OnceLock};

use crate::config::SessionConfig;
use crate::connection::{ConnectOptions, Connector, SharedConnection};
use crate::error::{SmockError, SmockResult};
use crate::interceptor::Interceptor;
use crate::registry::InterceptorRegistry;
use crate::session::Session;

/// Interception layer wrapping a real connector.
#[derive(Clone)]
pub struct Interception {
    registry: InterceptorRegistry,
    connector: Arc<dyn Connector>,
    config: SessionConfig,
}

impl Interception {
    /// Wrap `connector` with an empty registry and default configuration.
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::from_shared(Arc::new(connector))
    }

    /// Wrap an already shared connector.
    pub fn from_shared(connector: Arc<dyn Connector>) -> Self {
        Self {
            registry: InterceptorRegistry::new(),
            connector,
            config: SessionConfig::default(),
        }
    }

    /// Replace the configuration used for new sessions.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an interceptor.
    pub fn use_interceptor(&self, interceptor: impl Interceptor + 'static) -> &Self {
        self.registry.register(Arc::new(interceptor));
        self
    }

    /// The registry shared by every session opened through this layer.
    pub fn registry(&self) -> &InterceptorRegistry {
        &self.registry
    }

    /// Configuration handed to new sessions.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open an intercepted connection.
    pub fn open(&self, url: &str, options: ConnectOptions) -> SmockResult<Session> {
        Session::open(
            &self.registry,
            self.connector.as_ref(),
            url,
            options,
            self.config.clone(),
        )
    }
}

impl Connector for Interception {
    fn connect(&self, url: &str, options: ConnectOptions) -> SmockResult<SharedConnection> {
        Ok(Arc::new(self.open(url, options)?))
    }

    fn name(&self) -> &'static str {
        "interception"
    }
}

impl std::fmt::Debug for Interception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interception")
            .field("connector", &self.connector.name())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

/// Handle to the installed interception layer.
#[derive(Debug)]
pub struct Smock {
    interception: Interception,
}

impl Smock {
    /// Register an interceptor for every connection opened from now on.
    pub fn use_interceptor(&self, interceptor: impl Interceptor + 'static) -> &Self {
        self.interception.use_interceptor(interceptor);
        self
    }

    /// The process-wide registry.
    pub fn registry(&self) -> &InterceptorRegistry {
        self.interception.registry()
    }

    /// The installed interception layer.
    pub fn interception(&self) -> &Interception {
        &self.interception
    }
}

static INSTALLED: OnceLock<Smock> = OnceLock::new();

/// Install the interception layer over `connector` with default configuration.
///
/// # Errors
///
/// `SmockError::AlreadyInstalled` on every call after the first.
pub fn install(connector: impl Connector + 'static) -> SmockResult<&'static Smock> {
    install_with_config(connector, SessionConfig::default())
}

/// Install the interception layer over `connector`.
pub fn install_with_config(
    connector: impl Connector + 'static,
    config: SessionConfig,
) -> SmockResult<&'static Smock> {
    let smock = Smock {
        interception: Interception::new(connector).with_config(config),
    };
    let name = smock.interception.connector.name();

    INSTALLED
        .set(smock)
        .map_err(|_| SmockError::AlreadyInstalled)?;
    tracing::info!("Interception layer installed over {} connector", name);

    INSTALLED.get().ok_or_else(|| SmockError::internal("installation vanished"))
}

/// The installed handle.
///
/// # Errors
///
/// `SmockError::NotInstalled` before [`install`] has been called.
pub fn smock() -> SmockResult<&'static Smock> {
    INSTALLED.get().ok_or(SmockError::NotInstalled)
}

/// Whether [`install`] has been called.
pub fn is_installed() -> bool {
    INSTALLED.get().is_some()
}

/// Open a connection through the process-wide constructor.
///
/// After installation the connection is an intercepted [`Session`]. Before
/// it, the native WebSocket connector is used directly.
pub fn connect(url: &str, options: ConnectOptions) -> SmockResult<SharedConnection> {
    match INSTALLED.get() {
        Some(smock) => smock.interception.connect(url, options),
        None => native_connect(url, options),
    }
}

#[cfg(feature = "websocket")]
fn native_connect(url: &str, options: ConnectOptions) -> SmockResult<SharedConnection> {
    crate::connection::websocket::WebSocketConnector::new().connect(url, options)
}

#[cfg(not(feature = "websocket"))]
fn native_connect(_url: &str, _options: ConnectOptions) -> SmockResult<SharedConnection> {
    Err(SmockError::NotInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, MemoryConnector, Payload};
    use crate::interceptor::FnInterceptor;

    #[tokio::test]
    async fn test_interception_is_a_connector() {
        let memory = Arc::new(MemoryConnector::new());
        let interception = Interception::from_shared(memory.clone());
        interception.use_interceptor(
            FnInterceptor::any().on_send(|p, _| async move { Ok(p.map_text(|t| t.repeat(2))) }),
        );

        let connector: &dyn Connector = &interception;
        let connection = connector.connect("wss://x", ConnectOptions::new()).unwrap();
        let real = memory.last().unwrap();
        real.open();

        connection.send(Payload::text("ab")).await.unwrap();
        assert_eq!(real.sent(), vec![Payload::text("abab")]);
        assert_eq!(connector.name(), "interception");
    }

    #[tokio::test]
    async fn test_open_uses_configuration() {
        let interception =
            Interception::new(MemoryConnector::new()).with_config(SessionConfig::default().deliver_empty());
        let session = interception.open("wss://x", ConnectOptions::new()).unwrap();
        assert_eq!(session.config(), interception.config());
    }
}
