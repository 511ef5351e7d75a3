//! Hostname to route-table binding.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Defaults;
use crate::error::{RutaError, RutaResult};
use crate::util::{self, HeaderOverrides};

use super::config::HostSection;
use super::table::RouteTable;

/// The hostname bound when no other entry matches.
pub const WILDCARD_HOST: &str = "*";

/// Immutable per-host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Milliseconds; 0 means no timeout.
    pub timeout: u64,
    pub headers: Option<HeaderOverrides>,
    pub proxy_headers: Option<HeaderOverrides>,
    pub redirect_headers: Option<HeaderOverrides>,
}

/// A host's config plus its ordered route resolvers.
pub struct HostEntry {
    pub config: Arc<HostConfig>,
    pub tables: Vec<Arc<RouteTable>>,
}

/// Mapping from lower-cased hostname (or `*`) to host entry.
pub struct HostTable {
    entries: HashMap<String, HostEntry>,
}

impl HostTable {
    /// Build the host table from declarations. Each hostname may be bound
    /// only once; hostnames substituted to the empty string are dropped.
    pub fn build(
        hosts: &[HostSection],
        defaults: &Defaults,
        tables: &HashMap<String, Arc<RouteTable>>,
        subs: &HashMap<String, String>,
    ) -> RutaResult<Self> {
        let mut entries = HashMap::new();

        for section in hosts {
            let config = Arc::new(HostConfig {
                timeout: section.timeout.unwrap_or(defaults.timeout),
                headers: merged(defaults.headers.as_ref(), section.headers.as_ref()),
                proxy_headers: merged(
                    defaults.proxy_headers.as_ref(),
                    section.proxy_headers.as_ref(),
                ),
                redirect_headers: merged(
                    defaults.redirect_headers.as_ref(),
                    section.redirect_headers.as_ref(),
                ),
            });

            let mut resolved = Vec::with_capacity(section.route_tables.len());
            for id in &section.route_tables {
                let table = tables.get(id).ok_or_else(|| {
                    RutaError::config(format!("host references unknown route table '{}'", id))
                })?;
                resolved.push(table.clone());
            }

            for raw in &section.hostnames {
                let name = util::substitute(raw, subs);
                if name.is_empty() {
                    continue;
                }
                let name = name.to_lowercase();
                if name != WILDCARD_HOST && !util::is_hostname_valid(&name) {
                    return Err(RutaError::config(format!("invalid hostname '{}'", name)));
                }
                if entries.contains_key(&name) {
                    return Err(RutaError::config(format!(
                        "hostname '{}' bound more than once",
                        name
                    )));
                }
                entries.insert(
                    name,
                    HostEntry {
                        config: config.clone(),
                        tables: resolved.clone(),
                    },
                );
            }
        }

        Ok(Self { entries })
    }

    /// Look up a hostname, falling back to the `*` entry when defined.
    pub fn lookup(&self, hostname: &str) -> Option<&HostEntry> {
        self.entries
            .get(hostname)
            .or_else(|| self.entries.get(WILDCARD_HOST))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn merged(
    base: Option<&HeaderOverrides>,
    extra: Option<&HeaderOverrides>,
) -> Option<HeaderOverrides> {
    if base.is_none() && extra.is_none() {
        return None;
    }
    Some(util::merge_headers(base, extra))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Defaults {
        Defaults::default()
    }

    fn empty_tables() -> HashMap<String, Arc<RouteTable>> {
        HashMap::new()
    }

    fn section(hostnames: &[&str]) -> HostSection {
        HostSection {
            hostnames: hostnames.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_wildcard_fallback() {
        let hosts = vec![section(&["example.com"]), section(&["*"])];
        let table =
            HostTable::build(&hosts, &defaults(), &empty_tables(), &HashMap::new()).unwrap();

        assert!(table.lookup("example.com").is_some());
        assert!(table.lookup("unknown.example").is_some());

        let hosts = vec![section(&["example.com"])];
        let table =
            HostTable::build(&hosts, &defaults(), &empty_tables(), &HashMap::new()).unwrap();
        assert!(table.lookup("unknown.example").is_none());
    }

    #[test]
    fn test_duplicate_hostname_rejected() {
        let hosts = vec![section(&["example.com"]), section(&["Example.COM"])];
        assert!(
            HostTable::build(&hosts, &defaults(), &empty_tables(), &HashMap::new()).is_err()
        );
    }

    #[test]
    fn test_empty_substitution_drops_hostname() {
        let mut subs = HashMap::new();
        subs.insert("extra".to_string(), String::new());
        let hosts = vec![section(&["example.com", "%extra%"])];
        let table = HostTable::build(&hosts, &defaults(), &empty_tables(), &subs).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unknown_route_table_rejected() {
        let mut host = section(&["example.com"]);
        host.route_tables = vec!["missing".to_string()];
        assert!(
            HostTable::build(&[host], &defaults(), &empty_tables(), &HashMap::new()).is_err()
        );
    }

    #[test]
    fn test_header_defaults_merge() {
        let mut defaults = defaults();
        defaults.headers = Some(
            [("X-Base".to_string(), "1".to_string())]
                .into_iter()
                .collect(),
        );
        let mut host = section(&["example.com"]);
        host.headers = Some(
            [("X-Host".to_string(), "2".to_string())]
                .into_iter()
                .collect(),
        );
        let table =
            HostTable::build(&[host], &defaults, &empty_tables(), &HashMap::new()).unwrap();
        let entry = table.lookup("example.com").unwrap();
        let headers = entry.config.headers.as_ref().unwrap();
        assert_eq!(headers.get("x-base").map(String::as_str), Some("1"));
        assert_eq!(headers.get("x-host").map(String::as_str), Some("2"));
        assert!(entry.config.proxy_headers.is_none());
    }
}
