//! Response primitives. Each of these finalizes the exchange by producing
//! the `hyper::Response` handed back to the transport.

use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use hyper::{Body, Response, StatusCode};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::HttpError;
use crate::routing::route::GeoTarget;
use crate::util::{self, HeaderOverrides};

use super::context::RequestContext;

/// Close the exchange with a bare status. Codes in [310, 600) convert to an
/// error response.
pub fn end_response(code: u16) -> Response<Body> {
    if (310..600).contains(&code) {
        return error_response(&HttpError::new(code));
    }
    status_response(code)
}

/// A response with the given status and an empty body.
pub fn status_response(status: u16) -> Response<Body> {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Surface an [`HttpError`] to the client as plain text.
pub fn error_response(err: &HttpError) -> Response<Body> {
    let status = StatusCode::from_u16(err.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(err.message.clone()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Send a body with the merged response headers of the host and request.
///
/// The status must lie in [100, 599] (anything else becomes 200); the
/// Content-Type comes from the request's type hint, else is inferred from
/// the path, else falls back to text/html.
pub fn send(ctx: &RequestContext, status: u16, content: impl Into<Body>) -> Response<Body> {
    let status = if (100..=599).contains(&status) {
        status
    } else {
        200
    };
    let mut resp = status_response(status);
    *resp.body_mut() = content.into();

    let overrides = util::merge_headers(
        ctx.host_config.as_ref().and_then(|h| h.headers.as_ref()),
        Some(&ctx.headers),
    );
    apply_overrides(&mut resp, &overrides);

    if !resp.headers().contains_key(CONTENT_TYPE) {
        let content_type = ctx
            .content_type
            .clone()
            .or_else(|| {
                mime_guess::from_path(&ctx.path)
                    .first_raw()
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "text/html".to_string());
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            resp.headers_mut().insert(CONTENT_TYPE, value);
        }
    }
    resp
}

/// Serialize a JSON value.
pub fn json(ctx: &RequestContext, value: &Value) -> Response<Body> {
    let body = match serde_json::to_string(value) {
        Ok(body) => body,
        Err(e) => {
            warn!("JSON serialization failed: {}", e);
            return error_response(&HttpError::new(500));
        }
    };
    let mut resp = send(ctx, 200, body);
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

/// Serialize JSON, wrapped in `callback(...)` when the request carries a
/// non-empty `callback` query parameter.
pub fn jsonp(ctx: &RequestContext, value: &Value) -> Response<Body> {
    let callback = ctx
        .query_params
        .get("callback")
        .and_then(|v| v.as_str())
        .filter(|cb| !cb.is_empty());
    let Some(callback) = callback else {
        return json(ctx, value);
    };
    let body = match serde_json::to_string(value) {
        Ok(body) => body,
        Err(e) => {
            warn!("JSON serialization failed: {}", e);
            return error_response(&HttpError::new(500));
        }
    };
    let mut resp = send(ctx, 200, format!("/**/{}({});", callback, body));
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/javascript; charset=utf-8"),
    );
    resp.headers_mut().insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    resp
}

/// Serve a file from disk. Missing files and directories 404 quietly;
/// other IO failures surface as 500.
pub async fn send_file(ctx: &RequestContext, path: &Path) -> Response<Body> {
    match tokio::fs::read(path).await {
        Ok(contents) => {
            let mut resp = send(ctx, 200, contents);
            if let Some(mime) = mime_guess::from_path(path).first_raw() {
                if let Ok(value) = HeaderValue::from_str(mime) {
                    resp.headers_mut().insert(CONTENT_TYPE, value);
                }
            }
            resp
        }
        Err(e)
            if e.kind() == std::io::ErrorKind::NotFound
                || e.raw_os_error() == Some(libc_eisdir()) =>
        {
            debug!(path = %path.display(), "file not served: {}", e);
            error_response(&HttpError::new(404))
        }
        Err(e) => {
            warn!(path = %path.display(), "file read failed: {}", e);
            error_response(&HttpError::new(500))
        }
    }
}

#[cfg(unix)]
const fn libc_eisdir() -> i32 {
    21
}

#[cfg(not(unix))]
const fn libc_eisdir() -> i32 {
    -1
}

/// Redirect with the merged redirect headers of the host and request. Codes
/// outside [300, 310] fall back to the configured default.
pub fn redirect_response(ctx: &RequestContext, code: u16, location: &str) -> Response<Body> {
    let code = if (300..=310).contains(&code) {
        code
    } else {
        ctx.settings.redirect_code
    };
    let mut resp = status_response(code);
    let overrides = util::merge_headers(
        ctx.host_config
            .as_ref()
            .and_then(|h| h.redirect_headers.as_ref()),
        Some(&ctx.headers),
    );
    apply_overrides(&mut resp, &overrides);
    match HeaderValue::from_str(location) {
        Ok(value) => {
            resp.headers_mut().insert(LOCATION, value);
            resp
        }
        Err(_) => {
            warn!(location, "redirect location not header-safe");
            error_response(&HttpError::new(500))
        }
    }
}

/// The client-side geo redirector: a 200 HTML page whose script reads the
/// `countryCode` cookie and navigates to the geo-specific URL, with a
/// `<noscript>` meta-refresh fallback to the default destination.
pub fn geo_redirect_page(ctx: &RequestContext, geo: &GeoTarget, query_suffix: &str) -> Response<Body> {
    let targets: serde_json::Map<String, Value> = geo
        .entries
        .iter()
        .map(|(code, url)| {
            (
                code.clone(),
                Value::String(format!("{}{}", url, query_suffix)),
            )
        })
        .collect();
    let fallback = format!("{}{}", geo.fallback, query_suffix);
    let targets_json = script_safe_json(
        &serde_json::to_string(&Value::Object(targets)).unwrap_or_else(|_| "{}".to_string()),
    );
    let fallback_json = script_safe_json(
        &serde_json::to_string(&fallback).unwrap_or_else(|_| "\"/\"".to_string()),
    );
    // The query suffix is attacker-controlled; the raw-HTML uses must be
    // entity-escaped, and the embedded JSON must not be able to close the
    // script element.
    let fallback_html = html_escape(&fallback);

    let page = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <noscript><meta http-equiv=\"refresh\" content=\"0;url={fallback_html}\"></noscript>\n\
         <script>\n(function () {{\n  var targets = {targets_json};\n  var fallback = {fallback_json};\n  \
         var m = document.cookie.match(/(?:^|;\\s*)countryCode=([A-Za-z]{{2}})/);\n  \
         var code = m ? m[1].toUpperCase() : null;\n  \
         window.location.replace((code && targets[code]) || fallback);\n}})();\n</script>\n\
         </head>\n<body>\n<a href=\"{fallback_html}\">Continue</a>\n</body>\n</html>\n",
        fallback_html = fallback_html,
        targets_json = targets_json,
        fallback_json = fallback_json,
    );

    let mut resp = send(ctx, 200, page);
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    resp
}

/// Escape angle brackets in serialized JSON so a value containing
/// `</script>` cannot terminate the enclosing script element.
fn script_safe_json(json: &str) -> String {
    json.replace('<', "\\u003c").replace('>', "\\u003e")
}

/// Entity-escape a string for use in HTML text or attribute values.
fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn apply_overrides(resp: &mut Response<Body>, overrides: &HeaderOverrides) {
    for (name, value) in overrides {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                resp.headers_mut().insert(name, value);
            }
            _ => warn!(header = name.as_str(), "skipping malformed response header"),
        }
    }
}
