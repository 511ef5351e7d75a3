//! Compiled route representation: the runtime-filter envelope shared by all
//! routes and the tagged action variant behind it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::RutaError;
use crate::request::RequestContext;
use crate::util;

use super::config::HandlerOptions;
use super::handler::RouteHandler;

/// Request scheme. The engine only speaks plain and TLS-terminated HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = RutaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(RutaError::config(format!(
                "invalid protocol '{}' (expected http or https)",
                other
            ))),
        }
    }
}

/// Runtime filters evaluated against the request on every match attempt.
#[derive(Debug, Clone, Default)]
pub struct RouteFilters {
    pub method_match: Option<String>,
    pub host_match: Option<String>,
    /// 0 matches any port.
    pub port_match: u16,
    pub proto_match: Option<Scheme>,
    pub allow_write: bool,
    pub force_proto: Option<Scheme>,
    /// 0 means the default port for the forced scheme.
    pub force_port: u16,
    /// Applied to the tail after a trie prefix match.
    pub post_match: Option<Regex>,
}

/// A compiled rule: filters plus the action to run on a match.
pub struct Route {
    pub filters: RouteFilters,
    pub action: RouteAction,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("filters", &self.filters)
            .field("action", &self.action)
            .finish()
    }
}

/// The three action variants a route can carry.
pub enum RouteAction {
    Rewrite(RewriteRule),
    Redirect(RedirectRule),
    Handled(HandledRule),
}

impl fmt::Debug for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteAction::Rewrite(r) => f
                .debug_struct("Rewrite")
                .field("pattern", &r.pattern.as_str())
                .field("replace", &r.replace)
                .finish(),
            RouteAction::Redirect(r) => f
                .debug_struct("Redirect")
                .field("location", &r.location)
                .field("code", &r.code)
                .finish(),
            RouteAction::Handled(h) => {
                f.debug_struct("Handled").field("name", &h.name).finish()
            }
        }
    }
}

/// Regex rewrite of the request URL, optionally emitted as a redirect.
#[derive(Debug)]
pub struct RewriteRule {
    pub pattern: Regex,
    pub replace: String,
    /// When true the pattern sees the full url including the query string.
    pub match_params: bool,
    /// 0 rewrites in place; 301..=308 emits a redirect instead.
    pub redirect_code: u16,
    /// Non-zero short-circuits the match with this status and an empty body.
    pub status: u16,
    /// Apply the rewrite in place and keep matching instead of re-entering
    /// the routing loop.
    pub is_last: bool,
}

/// Redirect to a fixed destination, optionally geo-targeted.
#[derive(Debug)]
pub struct RedirectRule {
    pub location: String,
    pub code: u16,
    pub keep_params: bool,
    pub geo_target: Option<GeoTarget>,
}

/// Expanded geo-target lookup table, ordered by precedence.
#[derive(Debug, Clone)]
pub struct GeoTarget {
    pub entries: Vec<(String, String)>,
    pub fallback: String,
}

/// Dispatch to a named handler from the configured namespace.
pub struct HandledRule {
    pub name: String,
    pub handler: Arc<dyn RouteHandler>,
    pub options: HandlerOptions,
}

/// Arguments handed to a matched route's action.
#[derive(Debug, Clone, Default)]
pub struct MatchArgs {
    /// The matched portion of the key.
    pub matched: String,
    /// The key remainder after the match.
    pub tail: String,
    /// The full key the matcher ran against.
    pub key: String,
    /// Numbered capture groups (regex tables only; index 0 is the whole
    /// match).
    pub captures: Vec<Option<String>>,
}

/// Evaluate a route's runtime filters against the request.
///
/// All of the following must hold: the method filter (or, without one, a
/// write method requires `allow_write`), the port filter, the host filter
/// and the protocol filter.
pub fn runtime_checks(ctx: &RequestContext, filters: &RouteFilters) -> bool {
    if let Some(method) = &filters.method_match {
        if ctx.method != *method {
            return false;
        }
    } else if !filters.allow_write && util::is_write_method(&ctx.method) {
        return false;
    }
    if filters.port_match != 0 && ctx.port != filters.port_match {
        return false;
    }
    if let Some(host) = &filters.host_match {
        if ctx.hostname != *host {
            return false;
        }
    }
    if let Some(proto) = filters.proto_match {
        if ctx.scheme != proto {
            return false;
        }
    }
    true
}
