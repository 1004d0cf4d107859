//! Append-only registry of interceptors.

use std::sync::{Arc, PoisonError, RwLock};

use crate::interceptor::Interceptor;

/// Ordered, append-only collection of interceptors shared by all sessions.
///
/// Cloning the registry yields another handle to the same collection.
/// There is no removal: interceptors live as long as the registry.
#[derive(Clone, Default)]
pub struct InterceptorRegistry {
    interceptors: Arc<RwLock<Vec<Arc<dyn Interceptor>>>>,
}

impl InterceptorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor. Registration order is application order.
    pub fn register(&self, interceptor: Arc<dyn Interceptor>) {
        let mut interceptors = self
            .interceptors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        interceptors.push(interceptor);
        tracing::debug!(
            "Registered interceptor '{}' ({} total)",
            interceptors[interceptors.len() - 1].name(),
            interceptors.len()
        );
    }

    /// The registered interceptors matching `url`, in registration order.
    ///
    /// The result is a snapshot: later registrations do not affect it.
    pub fn bind(&self, url: &str) -> Vec<Arc<dyn Interceptor>> {
        self.interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|interceptor| interceptor.matches(url))
            .cloned()
            .collect()
    }

    /// Names of all registered interceptors, in registration order
    pub fn names(&self) -> Vec<String> {
        self.interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    /// Number of registered interceptors
    pub fn len(&self) -> usize {
        self.interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been registered yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorRegistry")
            .field("interceptors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::FnInterceptor;

    #[test]
    fn test_register_preserves_order() {
        let registry = InterceptorRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(FnInterceptor::any().named("first")));
        registry.register(Arc::new(FnInterceptor::any().named("second")));
        registry.register(Arc::new(FnInterceptor::any().named("third")));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.names(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_bind_filters_by_url() {
        let registry = InterceptorRegistry::new();
        registry.register(Arc::new(
            FnInterceptor::new(|url| url.starts_with("wss://a")).named("a"),
        ));
        registry.register(Arc::new(FnInterceptor::any().named("all")));
        registry.register(Arc::new(
            FnInterceptor::new(|url| url.starts_with("wss://b")).named("b"),
        ));

        let bound: Vec<String> = registry
            .bind("wss://b.example")
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        assert_eq!(bound, vec!["all", "b"]);
    }

    #[test]
    fn test_bind_is_a_snapshot() {
        let registry = InterceptorRegistry::new();
        registry.register(Arc::new(FnInterceptor::any().named("early")));

        let bound = registry.bind("wss://x");
        registry.register(Arc::new(FnInterceptor::any().named("late")));

        assert_eq!(bound.len(), 1);
        assert_eq!(registry.bind("wss://x").len(), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let registry = InterceptorRegistry::new();
        let handle = registry.clone();
        handle.register(Arc::new(FnInterceptor::any()));
        assert_eq!(registry.len(), 1);
    }
}
