//! Route-handler contract and the named namespace routes resolve against.

use async_trait::async_trait;
use hyper::{Body, Response};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RutaResult;
use crate::request::RequestContext;

use super::route::{MatchArgs, Route};

/// Result of running a matched route's action.
pub enum RouteOutcome {
    /// The action terminated the exchange with this response.
    Response(Response<Body>),
    /// The action rewrote the request URL. When `last` is set the rewrite
    /// is applied in place and matching continues; otherwise the routing
    /// loop re-enters from the top.
    Rewrite { url: String, last: bool },
    /// The action declined; the matcher keeps looking.
    Unhandled,
}

/// A user-supplied route action.
///
/// A handler must either terminate the response (return
/// [`RouteOutcome::Response`]) or return [`RouteOutcome::Unhandled`] to let
/// the matcher continue. Errors are caught by the resolver and converted to
/// a 500 response.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        route: &Route,
        args: &MatchArgs,
    ) -> RutaResult<RouteOutcome>;
}

/// Named handler namespace. Handler lookups happen at build time; compiled
/// routes hold the handler reference directly.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn RouteHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the builtin `proxy` and `file` handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::builtin::ProxyHandler));
        registry.register(Arc::new(super::builtin::FileHandler));
        registry
    }

    /// Register a handler under its own name, replacing any previous
    /// binding.
    pub fn register(&mut self, handler: Arc<dyn RouteHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RouteHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl RouteHandler for NoopHandler {
        fn name(&self) -> &str {
            "noop"
        }

        async fn handle(
            &self,
            _ctx: &mut RequestContext,
            _route: &Route,
            _args: &MatchArgs,
        ) -> RutaResult<RouteOutcome> {
            Ok(RouteOutcome::Unhandled)
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(NoopHandler));
        assert!(registry.get("noop").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_builtins_present() {
        let registry = HandlerRegistry::with_builtins();
        assert!(registry.get("proxy").is_some());
        assert!(registry.get("file").is_some());
    }
}
