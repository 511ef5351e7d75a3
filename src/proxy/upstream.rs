//! Upstream forwarding for proxied routes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hyper::header::{HeaderName, HeaderValue, AUTHORIZATION, HOST, LOCATION};
use hyper::{Body, HeaderMap, Method, Request, Response, StatusCode, Uri};
use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{RutaError, RutaResult};
use crate::request::RequestContext;
use crate::routing::{ProxyOptions, Scheme};
use crate::util::HeaderOverrides;

use super::client;

/// Build and dispatch the upstream request described by the route's proxy
/// options, returning the upstream response piped back to the client.
pub async fn forward(
    ctx: &mut RequestContext,
    options: &ProxyOptions,
) -> RutaResult<Response<Body>> {
    let hostname = options
        .hostname
        .as_deref()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RutaError::proxy("Proxy hostname not set"))?;

    let scheme = options.proto.unwrap_or(if ctx.proto_ver == "2.0" {
        Scheme::Https
    } else {
        ctx.scheme
    });
    let port = options.port.unwrap_or(0);
    let authority = if port != 0 && port != scheme.default_port() {
        format!("{}:{}", hostname, port)
    } else {
        hostname.to_string()
    };

    let mut path = options.path.clone().unwrap_or_else(|| ctx.path.clone());
    if let (Some(pattern), Some(replace)) = (&options.path_match, &options.path_replace) {
        let re = Regex::new(pattern)
            .map_err(|e| RutaError::proxy(format!("invalid path_match: {}", e)))?;
        path = re.replace(&path, replace.as_str()).into_owned();
    }
    let query = options.query.clone().unwrap_or_else(|| ctx.query.clone());
    let uri: Uri = if query.is_empty() {
        format!("{}://{}{}", scheme, authority, path)
    } else {
        format!("{}://{}{}?{}", scheme, authority, path, query)
    }
    .parse()?;

    let mut headers = ctx.req_headers.clone();
    strip_hop_by_hop_headers(&mut headers);
    if let Some(host_cfg) = &ctx.host_config {
        if let Some(extra) = &host_cfg.proxy_headers {
            apply_overrides(&mut headers, extra);
        }
    }
    if let Some(extra) = &options.headers {
        apply_overrides(&mut headers, extra);
    }
    headers.insert(
        HOST,
        authority
            .parse()
            .map_err(|e| RutaError::proxy(format!("bad upstream host: {}", e)))?,
    );
    apply_forwarding_headers(
        &mut headers,
        &ctx.remote_ip,
        &ctx.local_addr.ip().to_string(),
        ctx.scheme,
        scheme,
        &ctx.orig_host,
    );
    let auth = options
        .auth
        .as_deref()
        .filter(|a| !a.is_empty())
        .or_else(|| Some(ctx.auth.as_str()).filter(|a| !a.is_empty()));
    if let Some(auth) = auth {
        let value = format!("Basic {}", BASE64.encode(auth));
        headers.insert(
            AUTHORIZATION,
            value
                .parse()
                .map_err(|e| RutaError::proxy(format!("bad proxy auth: {}", e)))?,
        );
    }

    let method = Method::from_bytes(ctx.method.as_bytes())
        .map_err(|e| RutaError::proxy(format!("bad method: {}", e)))?;
    let body = ctx
        .captured_body
        .clone()
        .map(Body::from)
        .unwrap_or_else(Body::empty);
    let mut upstream_req = Request::builder().method(method).uri(uri).body(body)?;
    *upstream_req.headers_mut() = headers;

    debug!(target = %authority, path = %path, "proxying upstream");

    let timeout_ms = options.timeout.unwrap_or(ctx.timeout);
    let fut = client::shared().request(upstream_req);
    let upstream_res = if timeout_ms > 0 {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
            Ok(res) => res?,
            Err(_) => {
                warn!(target = %authority, timeout_ms, "upstream request timed out");
                return Err(RutaError::timeout(timeout_ms, "upstream request"));
            }
        }
    } else {
        fut.await?
    };

    Ok(build_downstream_response(upstream_res, hostname))
}

/// Append the local address to `X-Forwarded-For` (or seed it with the
/// client address), record the original scheme when it differs from the
/// upstream's, and carry the original `Host` in `X-Forwarded-Host`.
pub(crate) fn apply_forwarding_headers(
    headers: &mut HeaderMap,
    remote_ip: &str,
    local_ip: &str,
    orig_scheme: Scheme,
    upstream_scheme: Scheme,
    orig_host: &str,
) {
    let forwarded_for = match headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) => format!("{}, {}", existing, local_ip),
        None => remote_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(HeaderName::from_static("x-forwarded-for"), value);
    }

    if orig_scheme != upstream_scheme {
        headers.insert(
            HeaderName::from_static("x-forwarded-proto"),
            HeaderValue::from_static(orig_scheme.as_str()),
        );
    }

    if let Ok(value) = HeaderValue::from_str(orig_host) {
        headers.insert(HeaderName::from_static("x-forwarded-host"), value);
    }
}

/// Copy the upstream response through, dropping hop-by-hop headers and
/// rewriting redirect locations that point back at the proxy target so the
/// client returns through this server.
fn build_downstream_response(upstream: Response<Body>, target_host: &str) -> Response<Body> {
    let (parts, body) = upstream.into_parts();
    let mut builder = Response::builder().status(parts.status);

    for (name, value) in parts.headers.iter() {
        if is_hop_by_hop_header(name.as_str()) {
            continue;
        }
        if name == LOCATION && is_redirect(parts.status) {
            if let Some(rewritten) = rewrite_location(value, target_host) {
                builder = builder.header(LOCATION, rewritten);
                continue;
            }
        }
        builder = builder.header(name, value);
    }

    builder
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// When the Location host matches the proxy target, strip the origin so
/// the redirect stays relative to this server.
fn rewrite_location(value: &HeaderValue, target_host: &str) -> Option<HeaderValue> {
    let uri: Uri = value.to_str().ok()?.parse().ok()?;
    if uri.host()? != target_host {
        return None;
    }
    let local = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    HeaderValue::from_str(&local).ok()
}

fn apply_overrides(headers: &mut HeaderMap, overrides: &HeaderOverrides) {
    for (name, value) in overrides {
        match (
            HeaderName::from_bytes(name.to_lowercase().as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = name.as_str(), "skipping malformed proxy header"),
        }
    }
}

fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    // The Connection header may name additional hop-by-hop headers
    let extra: Vec<String> = headers
        .get("connection")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default();

    const HOP_HEADERS: &[&str] = &[
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ];
    for h in HOP_HEADERS {
        headers.remove(*h);
    }
    for name in extra {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_for_appends_local_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.1.1.1".parse().unwrap());
        apply_forwarding_headers(
            &mut headers,
            "2.2.2.2",
            "3.3.3.3",
            Scheme::Http,
            Scheme::Http,
            "example.com",
        );
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "1.1.1.1, 3.3.3.3");
        assert_eq!(headers.get("x-forwarded-host").unwrap(), "example.com");
        assert!(headers.get("x-forwarded-proto").is_none());
    }

    #[test]
    fn test_forwarded_for_seeds_with_client_ip() {
        let mut headers = HeaderMap::new();
        apply_forwarding_headers(
            &mut headers,
            "2.2.2.2",
            "3.3.3.3",
            Scheme::Https,
            Scheme::Http,
            "example.com",
        );
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "2.2.2.2");
        // Schemes differ, so the original is recorded
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "https");
    }

    #[test]
    fn test_hop_by_hop_stripping() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "close, x-internal".parse().unwrap());
        headers.insert("x-internal", "1".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("content-type", "text/plain".parse().unwrap());
        strip_hop_by_hop_headers(&mut headers);
        assert!(headers.get("connection").is_none());
        assert!(headers.get("x-internal").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert!(headers.get("content-type").is_some());
    }

    #[test]
    fn test_location_rewrite_only_for_target_host() {
        let value: HeaderValue = "http://backend.internal/next?x=1".parse().unwrap();
        assert_eq!(
            rewrite_location(&value, "backend.internal").unwrap(),
            "/next?x=1"
        );
        assert!(rewrite_location(&value, "other.internal").is_none());

        let relative: HeaderValue = "/already-relative".parse().unwrap();
        assert!(rewrite_location(&relative, "backend.internal").is_none());
    }
}
