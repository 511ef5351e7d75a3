//! Declarative configuration: the TOML file schema, environment-variable
//! expansion and the compiled engine settings.
//!
//! The file carries four sections: `[env]` (conds, subs and the listener
//! port origin map), `[defaults]`, `[[hosts]]` and `[route_tables.<id>]`.
//! Route handlers are code, not configuration; they are registered on the
//! engine's handler namespace before construction.

pub mod manager;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{RutaError, RutaResult};
use crate::routing::{HostSection, RouteTableConfig, Scheme};

pub use manager::ConfigManager;

/// Scheme/port recovery for a listener that sits behind a TLS terminator
/// or port mapper.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortOrigin {
    pub orig_proto: Scheme,
    /// `"1.1"` or `"2.0"`; taken from the transport when absent.
    pub orig_proto_ver: Option<String>,
    pub orig_port: Option<u16>,
}

/// Build-time environment carried by the configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvSection {
    /// Conditions route `conds` declarations are checked against.
    pub conds: HashMap<String, String>,
    /// `%name%` substitution values.
    pub subs: HashMap<String, String>,
    /// Listener port (as a string key) to origin description.
    pub ports: HashMap<String, PortOrigin>,
}

/// Host-level defaults, applied where hosts and routes do not override.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Defaults {
    pub allow_write: bool,
    pub normalize_urls: bool,
    pub redirect_code: u16,
    pub reduce_redirect_code: u16,
    pub remove_double_slashes: bool,
    pub retry_limit: u32,
    /// Milliseconds; 0 disables the timeout.
    pub timeout: u64,
    pub headers: Option<HashMap<String, String>>,
    pub proxy_headers: Option<HashMap<String, String>>,
    pub redirect_headers: Option<HashMap<String, String>>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            allow_write: false,
            normalize_urls: false,
            redirect_code: 302,
            reduce_redirect_code: 301,
            remove_double_slashes: false,
            retry_limit: 20,
            timeout: 20_000,
            headers: None,
            proxy_headers: None,
            redirect_headers: None,
        }
    }
}

/// The full declarative routing configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingFile {
    pub env: EnvSection,
    pub defaults: Defaults,
    pub hosts: Vec<HostSection>,
    pub route_tables: HashMap<String, RouteTableConfig>,
}

impl RoutingFile {
    /// Load from a file with `${VAR}` / `${VAR:-default}` expansion.
    pub async fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let config = Self::parse(&content)?;
        info!("Configuration loaded from {:?}", path.as_ref());
        Ok(config)
    }

    /// Parse and validate configuration content.
    pub fn parse(content: &str) -> RutaResult<Self> {
        let expanded = expand_env_vars(content);
        let config: RoutingFile = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Shallow validation; route compilation performs the deep checks.
    pub fn validate(&self) -> RutaResult<()> {
        if !(300..=399).contains(&self.defaults.redirect_code) {
            return Err(RutaError::config(format!(
                "defaults.redirect_code {} outside 300..=399",
                self.defaults.redirect_code
            )));
        }
        if !(300..=399).contains(&self.defaults.reduce_redirect_code) {
            return Err(RutaError::config(format!(
                "defaults.reduce_redirect_code {} outside 300..=399",
                self.defaults.reduce_redirect_code
            )));
        }
        for (id, table) in &self.route_tables {
            table.validate(id)?;
        }
        for port in self.env.ports.keys() {
            port.parse::<u16>().map_err(|_| {
                RutaError::config(format!("invalid listener port '{}' in env.ports", port))
            })?;
        }
        if self.hosts.is_empty() {
            warn!("no hosts configured - every request will be rejected with 503");
        }
        Ok(())
    }

    /// Compile the engine-wide settings carried into every request.
    pub fn settings(&self) -> RutaResult<Settings> {
        let mut ports = HashMap::new();
        for (port, origin) in &self.env.ports {
            let port = port.parse::<u16>().map_err(|_| {
                RutaError::config(format!("invalid listener port '{}' in env.ports", port))
            })?;
            ports.insert(port, origin.clone());
        }
        Ok(Settings {
            allow_write: self.defaults.allow_write,
            normalize_urls: self.defaults.normalize_urls,
            redirect_code: self.defaults.redirect_code,
            reduce_redirect_code: self.defaults.reduce_redirect_code,
            remove_double_slashes: self.defaults.remove_double_slashes,
            retry_limit: self.defaults.retry_limit,
            timeout: self.defaults.timeout,
            ports,
        })
    }
}

/// Compiled engine settings, shared read-only by every request.
#[derive(Debug, Clone)]
pub struct Settings {
    pub allow_write: bool,
    pub normalize_urls: bool,
    pub redirect_code: u16,
    pub reduce_redirect_code: u16,
    pub remove_double_slashes: bool,
    pub retry_limit: u32,
    pub timeout: u64,
    pub ports: HashMap<u16, PortOrigin>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allow_write: false,
            normalize_urls: false,
            redirect_code: 302,
            reduce_redirect_code: 301,
            remove_double_slashes: false,
            retry_limit: 20,
            timeout: 20_000,
            ports: HashMap::new(),
        }
    }
}

/// Expand environment variables in configuration content.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_expr = &result[start + 2..start + end];
            let replacement = if let Some(default_pos) = var_expr.find(":-") {
                let var_name = &var_expr[..default_pos];
                let default_value = &var_expr[default_pos + 2..];
                env::var(var_name).unwrap_or_else(|_| default_value.to_string())
            } else {
                env::var(var_expr).unwrap_or_else(|_| {
                    warn!(
                        "Environment variable '{}' not found, using empty string",
                        var_expr
                    );
                    String::new()
                })
            };

            result.replace_range(start..start + end + 1, &replacement);
        } else {
            break; // Malformed ${VAR expression
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [env.conds]
        stage = "production"

        [env.subs]
        root = "/srv/www"

        [env.ports.8443]
        orig_proto = "https"
        orig_proto_ver = "1.1"
        orig_port = 443

        [defaults]
        normalize_urls = true
        remove_double_slashes = true

        [[hosts]]
        hostnames = ["example.com", "*"]
        route_tables = ["main"]

        [route_tables.main]
        match_type = "trie"

        [[route_tables.main.routes]]
        on = "/old"
        redirect = "/new"
    "#;

    #[test]
    fn test_parse_sample() {
        let conf = RoutingFile::parse(SAMPLE).unwrap();
        assert_eq!(
            conf.env.conds.get("stage").map(String::as_str),
            Some("production")
        );
        assert_eq!(conf.hosts.len(), 1);
        assert_eq!(conf.hosts[0].hostnames, vec!["example.com", "*"]);
        assert!(conf.route_tables.contains_key("main"));

        let settings = conf.settings().unwrap();
        assert!(settings.normalize_urls);
        assert!(settings.remove_double_slashes);
        assert_eq!(settings.retry_limit, 20);
        assert_eq!(settings.timeout, 20_000);
        let origin = settings.ports.get(&8443).unwrap();
        assert_eq!(origin.orig_proto, Scheme::Https);
        assert_eq!(origin.orig_port, Some(443));
    }

    #[test]
    fn test_defaults() {
        let conf = RoutingFile::parse("").unwrap();
        assert_eq!(conf.defaults.redirect_code, 302);
        assert_eq!(conf.defaults.reduce_redirect_code, 301);
        assert_eq!(conf.defaults.retry_limit, 20);
        assert!(!conf.defaults.allow_write);
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(RoutingFile::parse("[defaults]\nredirect_code = 200").is_err());
        assert!(RoutingFile::parse("[env.ports.notaport]\norig_proto = \"http\"").is_err());
        // A non-string header value fails the build
        assert!(RoutingFile::parse("[defaults.headers]\n\"X-N\" = 1").is_err());
    }

    #[test]
    fn test_env_var_expansion() {
        env::set_var("RUTA_TEST_SUB", "expanded");
        let expanded = expand_env_vars("a = \"${RUTA_TEST_SUB}\"\nb = \"${RUTA_TEST_MISSING:-dflt}\"");
        assert!(expanded.contains("expanded"));
        assert!(expanded.contains("dflt"));
        env::remove_var("RUTA_TEST_SUB");
    }
}
