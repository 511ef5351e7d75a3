//! The top-level engine: composes the handler namespace, compiled settings
//! and host graph, dispatches every incoming request, and supports atomic
//! live reconfiguration.

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

use crate::config::{RoutingFile, Settings};
use crate::error::RutaResult;
use crate::request::{respond, RequestContext};
use crate::routing::{BuildEnv, HandlerRegistry, HostTable, RouteTable};

/// Hook invoked exactly once per request, after the terminal response is
/// produced.
pub type OnSentHook = Arc<dyn Fn(&RequestContext, &Response<Body>) + Send + Sync>;

/// Code-side environment the declarative configuration compiles against:
/// extra conds/subs and the route-handler namespace.
#[derive(Clone)]
pub struct EngineEnv {
    pub conds: HashMap<String, String>,
    pub subs: HashMap<String, String>,
    pub handlers: HandlerRegistry,
    pub on_sent: Option<OnSentHook>,
}

impl Default for EngineEnv {
    fn default() -> Self {
        Self {
            conds: HashMap::new(),
            subs: HashMap::new(),
            handlers: HandlerRegistry::with_builtins(),
            on_sent: None,
        }
    }
}

/// The graph a request captures at entry. Replaced wholesale on
/// reconfiguration; in-flight requests keep the one they started with.
struct EngineState {
    settings: Arc<Settings>,
    hosts: Arc<HostTable>,
}

/// The routing engine.
pub struct Engine {
    env: EngineEnv,
    state: RwLock<EngineState>,
}

impl Engine {
    /// Validate the configuration, compile every route table and build the
    /// host table.
    pub fn new(env: EngineEnv, conf: &RoutingFile) -> RutaResult<Self> {
        let state = build_state(&env, conf)?;
        info!(hosts = state.hosts.len(), "routing engine built");
        Ok(Self {
            env,
            state: RwLock::new(state),
        })
    }

    /// Rebuild the host graph from a new configuration and swap it in
    /// atomically. On failure the prior configuration stays active.
    pub fn reconfigure(&self, conf: &RoutingFile) -> RutaResult<()> {
        let state = build_state(&self.env, conf)?;
        info!(hosts = state.hosts.len(), "configuration swapped");
        *self.state.write().expect("engine state lock poisoned") = state;
        Ok(())
    }

    /// The catch-all HTTP entry point.
    pub async fn handle_routing(
        &self,
        req: Request<Body>,
        remote: SocketAddr,
        local: SocketAddr,
    ) -> Response<Body> {
        let (settings, hosts) = {
            let state = self.state.read().expect("engine state lock poisoned");
            (state.settings.clone(), state.hosts.clone())
        };

        let mut ctx = match RequestContext::from_parts(req, remote, local, settings) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(remote = %remote, "rejected request: {}", e);
                return respond::error_response(&e);
            }
        };

        let resp = ctx.run(&hosts).await;
        if let Some(hook) = &self.env.on_sent {
            hook(&ctx, &resp);
        }
        resp
    }

    /// Bind and serve; every method of every request lands in
    /// [`Engine::handle_routing`].
    pub async fn serve(self: Arc<Self>, bind: SocketAddr) -> anyhow::Result<()> {
        let engine = self;
        let make_service = make_service_fn(move |conn: &AddrStream| {
            let engine = engine.clone();
            let remote = conn.remote_addr();
            let local = conn.local_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let engine = engine.clone();
                    async move {
                        Ok::<_, Infallible>(engine.handle_routing(req, remote, local).await)
                    }
                }))
            }
        });

        info!("listening on {}", bind);
        let server = Server::bind(&bind).serve(make_service);
        if let Err(e) = server.await {
            error!("HTTP server error: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}

fn build_state(env: &EngineEnv, conf: &RoutingFile) -> RutaResult<EngineState> {
    conf.validate()?;
    let settings = Arc::new(conf.settings()?);

    // File-provided conds/subs extend (and override) the code-side ones
    let mut conds = env.conds.clone();
    conds.extend(conf.env.conds.clone());
    let mut subs = env.subs.clone();
    subs.extend(conf.env.subs.clone());

    let build_env = BuildEnv {
        conds: &conds,
        subs: &subs,
        handlers: &env.handlers,
        allow_write: conf.defaults.allow_write,
    };

    let mut tables = HashMap::new();
    for (id, table_conf) in &conf.route_tables {
        let table = RouteTable::build(id, table_conf, &build_env)?;
        tables.insert(id.clone(), Arc::new(table));
    }

    let hosts = Arc::new(HostTable::build(&conf.hosts, &conf.defaults, &tables, &subs)?);

    Ok(EngineState { settings, hosts })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(src: &str) -> RoutingFile {
        RoutingFile::parse(src).unwrap()
    }

    const BASE: &str = r#"
        [[hosts]]
        hostnames = ["*"]
        route_tables = ["main"]

        [route_tables.main]

        [[route_tables.main.routes]]
        on = "/old"
        redirect = "/new"
    "#;

    fn request(host: &str, path: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(path)
            .header("host", host)
            .body(Body::empty())
            .unwrap()
    }

    async fn drive(engine: &Engine, host: &str, path: &str) -> Response<Body> {
        engine
            .handle_routing(
                request(host, path),
                "9.9.9.9:40000".parse().unwrap(),
                "127.0.0.1:80".parse().unwrap(),
            )
            .await
    }

    #[tokio::test]
    async fn test_engine_routes_requests() {
        let engine = Engine::new(EngineEnv::default(), &config(BASE)).unwrap();
        let resp = drive(&engine, "anything.example", "/old").await;
        assert_eq!(resp.status(), 302);
        assert_eq!(resp.headers().get(hyper::header::LOCATION).unwrap(), "/new");

        let resp = drive(&engine, "anything.example", "/missing").await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_reconfigure_swaps_graph() {
        let engine = Engine::new(EngineEnv::default(), &config(BASE)).unwrap();

        let updated = config(
            r#"
            [[hosts]]
            hostnames = ["*"]
            route_tables = ["main"]

            [route_tables.main]

            [[route_tables.main.routes]]
            on = "/old"
            redirect = "/changed"
            "#,
        );
        engine.reconfigure(&updated).unwrap();
        let resp = drive(&engine, "h.example", "/old").await;
        assert_eq!(
            resp.headers().get(hyper::header::LOCATION).unwrap(),
            "/changed"
        );
    }

    #[tokio::test]
    async fn test_failed_reconfigure_keeps_prior_graph() {
        let engine = Engine::new(EngineEnv::default(), &config(BASE)).unwrap();

        let broken = RoutingFile::parse(
            r#"
            [[hosts]]
            hostnames = ["*"]
            route_tables = ["missing-table"]
            "#,
        )
        .unwrap();
        assert!(engine.reconfigure(&broken).is_err());

        let resp = drive(&engine, "h.example", "/old").await;
        assert_eq!(resp.status(), 302);
        assert_eq!(resp.headers().get(hyper::header::LOCATION).unwrap(), "/new");
    }

    #[tokio::test]
    async fn test_on_sent_hook_runs_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let counter = Arc::new(AtomicUsize::new(0));
        let hook_counter = counter.clone();
        let env = EngineEnv {
            on_sent: Some(Arc::new(move |_ctx, _resp| {
                hook_counter.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };
        let engine = Engine::new(env, &config(BASE)).unwrap();

        drive(&engine, "h.example", "/old").await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        drive(&engine, "h.example", "/missing").await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_host_without_wildcard_is_503() {
        let engine = Engine::new(
            EngineEnv::default(),
            &config(
                r#"
                [[hosts]]
                hostnames = ["known.example"]
                route_tables = ["main"]

                [route_tables.main]

                [[route_tables.main.routes]]
                on = "/x"
                redirect = "/y"
                "#,
            ),
        )
        .unwrap();

        let resp = drive(&engine, "known.example", "/x").await;
        assert_eq!(resp.status(), 302);
        let resp = drive(&engine, "unknown.example", "/x").await;
        assert_eq!(resp.status(), 503);
    }
}
