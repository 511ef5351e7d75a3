//! The per-request object: owns URL state, body ingestion and the routing
//! loop with bounded rewrite recursion.

use hyper::body::Bytes;
use hyper::header::HOST;
use hyper::{Body, Request, Response};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::config::Settings;
use crate::error::HttpError;
use crate::routing::{HostConfig, HostTable, RouteOutcome, Scheme};
use crate::util::{self, HeaderOverrides};

use super::normalize::{self, ParamValue};
use super::{body, respond};

/// Captured request body after ingestion.
#[derive(Debug, Clone, Default)]
pub enum BodyData {
    #[default]
    None,
    Raw(Bytes),
    Json(serde_json::Value),
    Form(HashMap<String, ParamValue>),
}

/// Per-request state. Created on entry, single-owner, destroyed after the
/// response; holds its own reference to the host graph captured at entry so
/// reconfiguration never affects an in-flight request.
#[derive(Debug)]
pub struct RequestContext {
    pub scheme: Scheme,
    /// `"1.1"` or `"2.0"`.
    pub proto_ver: String,
    pub method: String,
    /// Lower-cased, stripped of any `,`/whitespace tail.
    pub hostname: String,
    /// The raw `Host` header value.
    pub orig_host: String,
    pub path: String,
    /// Lower-cased copy of `path`.
    pub normalized_path: String,
    /// Raw query string, without the leading `?`.
    pub query: String,
    pub query_params: HashMap<String, ParamValue>,
    /// Path plus query.
    pub url: String,
    /// Absolute form including scheme and authority.
    pub href: String,
    pub port: u16,
    pub auth: String,
    pub hash: String,
    pub is_xhr: bool,
    /// MIME hint used when sending a response body.
    pub content_type: Option<String>,
    pub body: BodyData,
    /// Response-side header overrides accumulated while handling.
    pub headers: HeaderOverrides,
    /// Rewrite-recursion counter, bounded by the retry limit.
    pub route_pass: u32,
    pub host_config: Option<Arc<HostConfig>>,
    pub settings: Arc<Settings>,
    pub remote_ip: String,
    pub local_addr: SocketAddr,
    /// The original request headers, kept for proxying.
    pub req_headers: hyper::HeaderMap,
    /// Effective timeout in milliseconds for upstream work.
    pub timeout: u64,
    pub(crate) body_stream: Option<Body>,
    /// Raw body bytes captured by ingestion, replayed on proxying.
    pub(crate) captured_body: Option<Bytes>,
}

impl RequestContext {
    /// Build the request state from the transport's request. Fails with a
    /// 400 when the `Host` header is missing.
    pub fn from_parts(
        req: Request<Body>,
        remote: SocketAddr,
        local: SocketAddr,
        settings: Arc<Settings>,
    ) -> Result<Self, HttpError> {
        let (parts, body_stream) = req.into_parts();

        let orig_host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .ok_or_else(|| HttpError::with_message(400, "Missing Host header"))?;
        let (host_part, host_port) = util::split_host_port(&orig_host);
        let hostname = util::clean_hostname(host_part);
        if hostname.is_empty() {
            return Err(HttpError::with_message(400, "Missing Host header"));
        }

        let origin = settings.ports.get(&local.port());
        let scheme = origin.map(|o| o.orig_proto).unwrap_or(Scheme::Http);
        let proto_ver = origin
            .and_then(|o| o.orig_proto_ver.clone())
            .unwrap_or_else(|| match parts.version {
                hyper::Version::HTTP_2 => "2.0".to_string(),
                _ => "1.1".to_string(),
            });
        let port = host_port
            .or_else(|| origin.and_then(|o| o.orig_port))
            .unwrap_or_else(|| scheme.default_port());

        let path = parts.uri.path().to_string();
        let query = parts.uri.query().unwrap_or("").to_string();
        let is_xhr = parts
            .headers
            .get("x-requested-with")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("xmlhttprequest"));

        let timeout = settings.timeout;
        let mut ctx = Self {
            scheme,
            proto_ver,
            method: parts.method.as_str().to_string(),
            hostname,
            orig_host,
            path: String::new(),
            normalized_path: String::new(),
            query: String::new(),
            query_params: HashMap::new(),
            url: String::new(),
            href: String::new(),
            port,
            auth: String::new(),
            hash: String::new(),
            is_xhr,
            content_type: None,
            body: BodyData::None,
            headers: HeaderOverrides::new(),
            route_pass: 0,
            host_config: None,
            settings,
            remote_ip: remote.ip().to_string(),
            local_addr: local,
            req_headers: parts.headers,
            timeout,
            body_stream: Some(body_stream),
            captured_body: None,
        };
        ctx.set_url(&join_url(&path, &query));
        Ok(ctx)
    }

    /// Replace the request URL and re-derive every dependent field.
    pub fn set_url(&mut self, new_url: &str) {
        let (path, query) = match new_url.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (new_url.to_string(), String::new()),
        };
        self.url = join_url(&path, &query);
        self.normalized_path = path.to_lowercase();
        self.query_params = normalize::parse_query(&query);
        self.path = path;
        self.query = query;
        let default_port = self.scheme.default_port();
        self.href = if self.port == default_port {
            format!("{}://{}{}", self.scheme, self.hostname, self.url)
        } else {
            format!("{}://{}:{}{}", self.scheme, self.hostname, self.port, self.url)
        };
    }

    /// Drive the request through normalization, body ingestion, host lookup
    /// and the routing loop, producing the terminal response.
    pub async fn run(&mut self, hosts: &HostTable) -> Response<Body> {
        match self.run_inner(hosts).await {
            Ok(resp) => resp,
            Err(e) => respond::error_response(&e),
        }
    }

    async fn run_inner(&mut self, hosts: &HostTable) -> Result<Response<Body>, HttpError> {
        if self.settings.normalize_urls {
            let normalized = normalize::normalize_and_reduce(&self.url)
                .ok_or_else(|| HttpError::with_message(404, "Malformed URL"))?;
            if normalized != self.url {
                self.set_url(&normalized);
            }
        }

        if self.settings.remove_double_slashes && self.path.contains("//") {
            let location = join_url(&normalize::collapse_double_slashes(&self.path), &self.query);
            return Ok(respond::redirect_response(
                self,
                self.settings.reduce_redirect_code,
                &location,
            ));
        }

        body::ingest(self).await?;

        let entry = hosts
            .lookup(&self.hostname)
            .ok_or_else(|| HttpError::with_message(503, "Invalid hostname"))?;
        self.host_config = Some(entry.config.clone());
        if entry.config.timeout != 0 {
            self.timeout = entry.config.timeout;
        }

        loop {
            if self.route_pass > self.settings.retry_limit {
                return Err(HttpError::with_message(500, "Rewrite retry limit exceeded"));
            }

            let mut restart = false;
            let mut idx = 0;
            while idx < entry.tables.len() {
                match entry.tables[idx].resolve(self).await {
                    RouteOutcome::Response(resp) => return Ok(resp),
                    RouteOutcome::Unhandled => idx += 1,
                    RouteOutcome::Rewrite { url, last } => {
                        debug!(pass = self.route_pass, from = %self.url, to = %url, "rewrite");
                        match self.rewrite_request(&url, last)? {
                            Some(resp) => return Ok(resp),
                            None if last => idx += 1,
                            None => {
                                restart = true;
                                break;
                            }
                        }
                    }
                }
            }

            if !restart {
                return Err(HttpError::new(404));
            }
        }
    }

    /// Apply a rewrite. A rewrite that changes scheme, host or port turns
    /// into a redirect; otherwise the URL is re-normalized, double slashes
    /// are collapsed in place and the request fields are updated. An
    /// in-place (`last`) rewrite continues the current pass and does not
    /// advance the recursion counter.
    fn rewrite_request(
        &mut self,
        new_url: &str,
        last: bool,
    ) -> Result<Option<Response<Body>>, HttpError> {
        let stripped = strip_matching_origin(new_url, self.scheme, &self.hostname, self.port);
        let local = match stripped {
            OriginMatch::Local(local) => local,
            OriginMatch::Foreign => {
                return Ok(Some(respond::redirect_response(
                    self,
                    self.settings.redirect_code,
                    new_url,
                )));
            }
        };

        let local = if self.settings.normalize_urls {
            normalize::normalize_and_reduce(&local)
                .ok_or_else(|| HttpError::with_message(404, "Malformed URL"))?
        } else {
            local
        };

        let local = if self.settings.remove_double_slashes {
            let (path, query) = match local.split_once('?') {
                Some((p, q)) => (p.to_string(), Some(q.to_string())),
                None => (local, None),
            };
            let collapsed = normalize::collapse_double_slashes(&path);
            match query {
                Some(q) => format!("{}?{}", collapsed, q),
                None => collapsed,
            }
        } else {
            local
        };

        self.set_url(&local);
        if !last {
            self.route_pass += 1;
        }
        Ok(None)
    }
}

enum OriginMatch {
    /// The URL stays on this request's origin; the local part follows.
    Local(String),
    Foreign,
}

/// Compare an absolute rewrite target against the request origin. Relative
/// URLs are always local.
fn strip_matching_origin(
    url: &str,
    scheme: Scheme,
    hostname: &str,
    port: u16,
) -> OriginMatch {
    let (url_scheme, rest) = if let Some(rest) = url.strip_prefix("http://") {
        (Scheme::Http, rest)
    } else if let Some(rest) = url.strip_prefix("https://") {
        (Scheme::Https, rest)
    } else {
        return OriginMatch::Local(url.to_string());
    };

    let (authority, local) = match rest.find(['/', '?']) {
        Some(pos) if rest.as_bytes()[pos] == b'/' => (&rest[..pos], rest[pos..].to_string()),
        Some(pos) => (&rest[..pos], format!("/{}", &rest[pos..])),
        None => (rest, "/".to_string()),
    };
    let (url_host, url_port) = util::split_host_port(authority);
    let url_port = url_port.unwrap_or_else(|| url_scheme.default_port());

    if url_scheme == scheme && url_host.eq_ignore_ascii_case(hostname) && url_port == port {
        OriginMatch::Local(local)
    } else {
        OriginMatch::Foreign
    }
}

fn join_url(path: &str, query: &str) -> String {
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::test_support::test_context;

    #[test]
    fn test_from_parts_populates_fields() {
        let ctx = test_context("GET", "Example.COM:8080", "/Path/To?x=1&flag");
        assert_eq!(ctx.method, "GET");
        assert_eq!(ctx.hostname, "example.com");
        assert_eq!(ctx.port, 8080);
        assert_eq!(ctx.path, "/Path/To");
        assert_eq!(ctx.normalized_path, "/path/to");
        assert_eq!(ctx.query, "x=1&flag");
        assert_eq!(ctx.url, "/Path/To?x=1&flag");
        assert_eq!(ctx.href, "http://example.com:8080/Path/To?x=1&flag");
        assert_eq!(
            ctx.query_params.get("x"),
            Some(&ParamValue::Text("1".to_string()))
        );
        assert_eq!(ctx.query_params.get("flag"), Some(&ParamValue::Flag(true)));
        assert_eq!(ctx.route_pass, 0);
    }

    #[test]
    fn test_missing_host_header_rejected() {
        let req = Request::builder()
            .method("GET")
            .uri("/x")
            .body(Body::empty())
            .unwrap();
        let err = RequestContext::from_parts(
            req,
            "9.9.9.9:1000".parse().unwrap(),
            "127.0.0.1:80".parse().unwrap(),
            Arc::new(Settings::default()),
        )
        .unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[test]
    fn test_default_port_follows_scheme() {
        let ctx = test_context("GET", "example.com", "/");
        assert_eq!(ctx.port, 80);
        assert_eq!(ctx.href, "http://example.com/");
    }

    #[test]
    fn test_set_url_rederives_fields() {
        let mut ctx = test_context("GET", "example.com", "/old?a=1");
        ctx.set_url("/New/Path?b=2");
        assert_eq!(ctx.path, "/New/Path");
        assert_eq!(ctx.normalized_path, "/new/path");
        assert_eq!(ctx.query, "b=2");
        assert_eq!(ctx.url, "/New/Path?b=2");
        assert!(ctx.query_params.contains_key("b"));
        assert!(!ctx.query_params.contains_key("a"));
    }

    #[test]
    fn test_strip_matching_origin() {
        match strip_matching_origin("http://example.com/next?x=1", Scheme::Http, "example.com", 80)
        {
            OriginMatch::Local(local) => assert_eq!(local, "/next?x=1"),
            OriginMatch::Foreign => panic!("expected local"),
        }
        assert!(matches!(
            strip_matching_origin("https://example.com/next", Scheme::Http, "example.com", 80),
            OriginMatch::Foreign
        ));
        assert!(matches!(
            strip_matching_origin("http://other.com/next", Scheme::Http, "example.com", 80),
            OriginMatch::Foreign
        ));
        assert!(matches!(
            strip_matching_origin("http://example.com:81/x", Scheme::Http, "example.com", 80),
            OriginMatch::Foreign
        ));
        assert!(matches!(
            strip_matching_origin("/relative", Scheme::Http, "example.com", 80),
            OriginMatch::Local(_)
        ));
    }

    #[test]
    fn test_rewrite_request_foreign_origin_redirects() {
        let mut ctx = test_context("GET", "example.com", "/old");
        let resp = ctx
            .rewrite_request("https://elsewhere.example/new", false)
            .unwrap()
            .expect("expected a redirect");
        assert_eq!(resp.status(), 302);
        assert_eq!(
            resp.headers().get(hyper::header::LOCATION).unwrap(),
            "https://elsewhere.example/new"
        );
        assert_eq!(ctx.route_pass, 0);
    }

    #[test]
    fn test_rewrite_request_local_updates_fields() {
        let mut ctx = test_context("GET", "example.com", "/old?k=v");
        let resp = ctx.rewrite_request("/new?k=v", false).unwrap();
        assert!(resp.is_none());
        assert_eq!(ctx.path, "/new");
        assert_eq!(ctx.route_pass, 1);

        // An absolute URL on the same origin is treated as local
        let resp = ctx.rewrite_request("http://example.com/again", false).unwrap();
        assert!(resp.is_none());
        assert_eq!(ctx.path, "/again");
        assert_eq!(ctx.route_pass, 2);
    }

    #[test]
    fn test_in_place_rewrite_keeps_recursion_counter() {
        let mut ctx = test_context("GET", "example.com", "/legacy/guide");
        let resp = ctx.rewrite_request("/docs/guide", true).unwrap();
        assert!(resp.is_none());
        assert_eq!(ctx.path, "/docs/guide");
        assert_eq!(ctx.route_pass, 0);
    }
}
