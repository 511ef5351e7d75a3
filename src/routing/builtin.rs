//! Builtin route handlers: upstream proxying and static file serving.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

use crate::error::{HttpError, RutaError, RutaResult};
use crate::proxy;
use crate::request::{respond, RequestContext};

use super::handler::{RouteHandler, RouteOutcome};
use super::route::{MatchArgs, Route};

/// Forwards the request to the upstream described by `options.proxy`.
pub struct ProxyHandler;

#[async_trait]
impl RouteHandler for ProxyHandler {
    fn name(&self) -> &str {
        "proxy"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        route: &Route,
        _args: &MatchArgs,
    ) -> RutaResult<RouteOutcome> {
        let options = match &route.action {
            super::route::RouteAction::Handled(rule) => rule.options.proxy.as_ref(),
            _ => None,
        };
        let Some(options) = options else {
            return Err(RutaError::Http(HttpError::with_message(
                502,
                "Proxy hostname not set",
            )));
        };

        match proxy::forward(ctx, options).await {
            Ok(resp) => Ok(RouteOutcome::Response(resp)),
            Err(
                e @ (RutaError::Proxy { .. }
                | RutaError::Network { .. }
                | RutaError::Timeout { .. }),
            ) => {
                warn!(url = %ctx.url, "upstream request failed: {}", e);
                Ok(RouteOutcome::Response(respond::error_response(&e.to_http())))
            }
            Err(e) => Err(e),
        }
    }
}

/// Serves files from `options.root`, keyed by the match tail.
pub struct FileHandler;

#[async_trait]
impl RouteHandler for FileHandler {
    fn name(&self) -> &str {
        "file"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        route: &Route,
        args: &MatchArgs,
    ) -> RutaResult<RouteOutcome> {
        let root = match &route.action {
            super::route::RouteAction::Handled(rule) => rule.options.root.as_deref(),
            _ => None,
        };
        let Some(root) = root else {
            return Err(RutaError::internal("file handler requires options.root"));
        };

        let relative = if args.tail.is_empty() {
            ctx.path.trim_start_matches('/')
        } else {
            args.tail.trim_start_matches('/')
        };
        let Some(path) = resolve_under_root(Path::new(root), relative) else {
            return Ok(RouteOutcome::Response(respond::error_response(
                &HttpError::new(404),
            )));
        };

        Ok(RouteOutcome::Response(respond::send_file(ctx, &path).await))
    }
}

/// Join a request-supplied relative path onto the document root, refusing
/// anything that would escape it.
fn resolve_under_root(root: &Path, relative: &str) -> Option<PathBuf> {
    let candidate = Path::new(relative);
    let mut resolved = root.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_under_root() {
        let root = Path::new("/srv/www");
        assert_eq!(
            resolve_under_root(root, "a/b.txt"),
            Some(PathBuf::from("/srv/www/a/b.txt"))
        );
        assert_eq!(
            resolve_under_root(root, "./a.txt"),
            Some(PathBuf::from("/srv/www/a.txt"))
        );
        assert_eq!(resolve_under_root(root, "../secret"), None);
        assert_eq!(resolve_under_root(root, "a/../../secret"), None);
        assert_eq!(resolve_under_root(root, "/etc/passwd"), None);
    }
}
