//! Declarative route-table schema.
//!
//! These structs mirror the configuration file one-to-one; compilation into
//! the immutable matcher graph lives in [`super::table`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{RutaError, RutaResult};
use crate::util;

use super::route::Scheme;

/// Matching strategy for a route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Radix matcher with explicit end-of-match markers.
    #[serde(alias = "simple")]
    Trie,
    /// Ordered regex list; first declared match wins.
    Regex,
}

/// A declared route table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteTableConfig {
    pub match_type: MatchType,
    pub is_case_specific: bool,
    pub match_using_query_params: bool,
    pub force_proto: Option<Scheme>,
    /// 0 means the default port for the forced scheme.
    pub force_port: u16,
    pub default_handler: Option<String>,
    pub default_redirect_code: u16,
    pub routes: Vec<RouteConfig>,
}

impl Default for RouteTableConfig {
    fn default() -> Self {
        Self {
            match_type: MatchType::Trie,
            is_case_specific: true,
            match_using_query_params: false,
            force_proto: None,
            force_port: 0,
            default_handler: None,
            default_redirect_code: 302,
            routes: Vec::new(),
        }
    }
}

impl RouteTableConfig {
    pub fn validate(&self, id: &str) -> RutaResult<()> {
        if !(300..=399).contains(&self.default_redirect_code) {
            return Err(RutaError::config(format!(
                "route table '{}': default_redirect_code {} outside 300..=399",
                id, self.default_redirect_code
            )));
        }
        for (i, route) in self.routes.iter().enumerate() {
            route.validate().map_err(|e| {
                RutaError::config(format!("route table '{}', route {}: {}", id, i, e))
            })?;
        }
        Ok(())
    }
}

/// One declared route. Exactly one of the rewrite, redirect or handled
/// field groups may be present; a route with neither `rewrite` nor
/// `redirect` is handled by `do` or the table's default handler.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteConfig {
    /// The match pattern: a trie key (with optional `#` markers) or a
    /// regex, depending on the table's match type.
    pub on: String,
    /// Build-time conditions; every key must equal the engine's conds map
    /// or the route is dropped.
    pub conds: Option<HashMap<String, String>>,

    // Runtime filters
    pub method_match: Option<String>,
    pub host_match: Option<String>,
    pub port_match: Option<u16>,
    pub proto_match: Option<Scheme>,
    pub allow_write: Option<bool>,
    pub force_proto: Option<Scheme>,
    pub force_port: Option<u16>,
    pub post_match: Option<String>,

    // Rewrite routes
    pub rewrite: Option<String>,
    pub replace: Option<String>,
    pub match_params: Option<bool>,
    pub redirect_code: Option<u16>,
    pub status: Option<u16>,
    pub is_last: Option<bool>,

    // Redirect routes
    pub redirect: Option<String>,
    pub code: Option<u16>,
    pub keep_params: Option<bool>,
    pub geo_target: Option<HashMap<String, String>>,

    // Handled routes
    #[serde(rename = "do")]
    pub do_: Option<String>,
    pub options: Option<HandlerOptions>,
}

impl RouteConfig {
    fn validate(&self) -> RutaResult<()> {
        if self.on.is_empty() {
            return Err(RutaError::config("empty 'on' pattern"));
        }
        if let Some(method) = &self.method_match {
            if !method.contains('%') && !util::is_method_valid(method) {
                return Err(RutaError::config(format!(
                    "invalid method_match '{}'",
                    method
                )));
            }
        }
        let kinds =
            usize::from(self.rewrite.is_some()) + usize::from(self.redirect.is_some());
        if kinds > 1 {
            return Err(RutaError::config(
                "route declares both 'rewrite' and 'redirect'",
            ));
        }
        Ok(())
    }
}

/// A declared virtual host: one or more hostnames bound to an ordered list
/// of route tables.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HostSection {
    pub hostnames: Vec<String>,
    pub route_tables: Vec<String>,
    /// Per-host timeout override in milliseconds; 0 disables it.
    pub timeout: Option<u64>,
    pub headers: Option<HashMap<String, String>>,
    pub proxy_headers: Option<HashMap<String, String>>,
    pub redirect_headers: Option<HashMap<String, String>>,
}

/// Options attached to a handled route.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HandlerOptions {
    /// Upstream description for the builtin proxy handler.
    pub proxy: Option<ProxyOptions>,
    /// Document root for the builtin file handler.
    pub root: Option<String>,
    /// Overrides the request timeout for this route, in milliseconds.
    pub timeout: Option<u64>,
}

/// Upstream description consumed by the proxy action.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyOptions {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub proto: Option<Scheme>,
    pub path: Option<String>,
    /// With `path_replace`, a regex rewrite applied to the forwarded path.
    pub path_match: Option<String>,
    pub path_replace: Option<String>,
    pub query: Option<String>,
    pub auth: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    /// Upstream timeout in milliseconds.
    pub timeout: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_type_simple_alias() {
        let conf: RouteTableConfig = toml::from_str("match_type = \"simple\"").unwrap();
        assert_eq!(conf.match_type, MatchType::Trie);
        let conf: RouteTableConfig = toml::from_str("match_type = \"regex\"").unwrap();
        assert_eq!(conf.match_type, MatchType::Regex);
    }

    #[test]
    fn test_table_defaults() {
        let conf: RouteTableConfig = toml::from_str("").unwrap();
        assert_eq!(conf.match_type, MatchType::Trie);
        assert!(conf.is_case_specific);
        assert!(!conf.match_using_query_params);
        assert_eq!(conf.default_redirect_code, 302);
    }

    #[test]
    fn test_route_validation() {
        let route: RouteConfig = toml::from_str("on = \"/x\"").unwrap();
        assert!(route.validate().is_ok());

        let route: RouteConfig =
            toml::from_str("on = \"/x\"\nmethod_match = \"FETCH\"").unwrap();
        assert!(route.validate().is_err());

        let route: RouteConfig =
            toml::from_str("on = \"/x\"\nrewrite = \"^/x\"\nredirect = \"/y\"").unwrap();
        assert!(route.validate().is_err());

        let table = RouteTableConfig {
            default_redirect_code: 200,
            ..Default::default()
        };
        assert!(table.validate("t").is_err());
    }
}
