//! Small helpers shared across the routing engine: method and hostname
//! validation, `%name%` substitution, and header-map merging.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Header override maps as carried by host configs and requests.
pub type HeaderOverrides = HashMap<String, String>;

/// The closed set of HTTP methods the engine accepts.
pub const HTTP_METHODS: &[&str] = &[
    "ACL",
    "BIND",
    "CHECKOUT",
    "CONNECT",
    "COPY",
    "DELETE",
    "GET",
    "HEAD",
    "LINK",
    "LOCK",
    "M-SEARCH",
    "MERGE",
    "MKACTIVITY",
    "MKCALENDAR",
    "MKCOL",
    "MOVE",
    "NOTIFY",
    "OPTIONS",
    "PATCH",
    "POST",
    "PROPFIND",
    "PROPPATCH",
    "PURGE",
    "PUT",
    "REBIND",
    "REPORT",
    "SEARCH",
    "SOURCE",
    "SUBSCRIBE",
    "TRACE",
    "UNBIND",
    "UNLINK",
    "UNLOCK",
    "UNSUBSCRIBE",
];

/// Methods that may modify server state; requests using them are refused
/// unless a route opts in via `allow_write`.
pub const WRITE_METHODS: &[&str] = &[
    "POST",
    "PUT",
    "DELETE",
    "LOCK",
    "MERGE",
    "MKACTIVITY",
    "MKCOL",
    "MOVE",
    "PATCH",
    "PURGE",
    "UNLOCK",
    "UNSUBSCRIBE",
];

static HOSTNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+(\.[A-Za-z0-9_\-]+)*$").unwrap());

pub fn is_hostname_valid(s: &str) -> bool {
    HOSTNAME_RE.is_match(s)
}

pub fn is_method_valid(m: &str) -> bool {
    HTTP_METHODS.contains(&m)
}

pub fn is_write_method(m: &str) -> bool {
    WRITE_METHODS.contains(&m)
}

/// Replace `%name%` tokens with `subs[name]`.
///
/// Unknown tokens are left in place. The scan advances past a substituted
/// region, so substituted values are never re-expanded.
pub fn substitute(input: &str, subs: &HashMap<String, String>) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if bytes[i] == b'%' {
            if let Some(close) = input[i + 1..].find('%') {
                let name = &input[i + 1..i + 1 + close];
                if let Some(value) = subs.get(name) {
                    out.push_str(value);
                    i += close + 2;
                    continue;
                }
                // Unknown token: emit up to the closing '%' and rescan from
                // it, so it may still open the next token.
                out.push_str(&input[i..i + 1 + close]);
                i += close + 1;
                continue;
            }
        }
        let ch = input[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Merge two header maps into a fresh map with lower-cased keys.
/// Entries from `extra` override entries from `base`.
pub fn merge_headers(
    base: Option<&HeaderOverrides>,
    extra: Option<&HeaderOverrides>,
) -> HeaderOverrides {
    let mut merged = HeaderOverrides::new();
    if let Some(base) = base {
        for (k, v) in base {
            merged.insert(k.to_lowercase(), v.clone());
        }
    }
    if let Some(extra) = extra {
        for (k, v) in extra {
            merged.insert(k.to_lowercase(), v.clone());
        }
    }
    merged
}

/// Split a `Host` header value into hostname and optional port.
pub fn split_host_port(host: &str) -> (&str, Option<u16>) {
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse::<u16>() {
            Ok(p) => (name, Some(p)),
            Err(_) => (host, None),
        },
        None => (host, None),
    }
}

/// Lower-case a hostname and strip any `,` or whitespace tail.
pub fn clean_hostname(raw: &str) -> String {
    let end = raw
        .find(|c: char| c == ',' || c.is_whitespace())
        .unwrap_or(raw.len());
    raw[..end].to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_hostname_validation() {
        assert!(is_hostname_valid("example.com"));
        assert!(is_hostname_valid("api-v2.internal_zone.example"));
        assert!(is_hostname_valid("localhost"));
        assert!(!is_hostname_valid(""));
        assert!(!is_hostname_valid(".example.com"));
        assert!(!is_hostname_valid("example..com"));
        assert!(!is_hostname_valid("exa mple.com"));
        assert!(!is_hostname_valid("host:8080"));
    }

    #[test]
    fn test_method_sets() {
        assert!(is_method_valid("GET"));
        assert!(is_method_valid("MKACTIVITY"));
        assert!(!is_method_valid("get"));
        assert!(!is_method_valid("FETCH"));

        assert!(is_write_method("POST"));
        assert!(is_write_method("UNSUBSCRIBE"));
        assert!(!is_write_method("GET"));
        assert!(!is_write_method("SUBSCRIBE"));
    }

    #[test]
    fn test_substitute_basic() {
        let s = subs(&[("root", "/var/www"), ("stage", "prod")]);
        assert_eq!(substitute("%root%/html", &s), "/var/www/html");
        assert_eq!(substitute("%root%-%stage%", &s), "/var/www-prod");
        assert_eq!(substitute("no tokens here", &s), "no tokens here");
    }

    #[test]
    fn test_substitute_unknown_left_in_place() {
        let s = subs(&[("known", "yes")]);
        assert_eq!(substitute("%unknown%", &s), "%unknown%");
        assert_eq!(substitute("a %unknown% b", &s), "a %unknown% b");
        // A closing '%' can open the next token
        assert_eq!(substitute("%nope%known%", &s), "%nopeyes");
    }

    #[test]
    fn test_substitute_no_reexpansion() {
        // A substituted value containing '%name%' must not expand again
        let s = subs(&[("a", "%b%"), ("b", "deep")]);
        assert_eq!(substitute("%a%", &s), "%b%");
    }

    #[test]
    fn test_substitute_is_fixed_point_without_tokens() {
        let s = subs(&[("x", "1")]);
        for input in ["plain", "50% off", "a%b", "%", "%%"] {
            let once = substitute(input, &s);
            assert_eq!(substitute(&once, &s), once);
        }
    }

    #[test]
    fn test_merge_headers() {
        let base = subs(&[("X-Base", "1"), ("Shared", "base")]);
        let extra = subs(&[("X-EXTRA", "2"), ("shared", "extra")]);
        let merged = merge_headers(Some(&base), Some(&extra));
        assert_eq!(merged.get("x-base").map(String::as_str), Some("1"));
        assert_eq!(merged.get("x-extra").map(String::as_str), Some("2"));
        assert_eq!(merged.get("shared").map(String::as_str), Some("extra"));
        assert!(merged.keys().all(|k| k.chars().all(|c| !c.is_uppercase())));

        assert!(merge_headers(None, None).is_empty());
        let only_base = merge_headers(Some(&base), None);
        assert_eq!(only_base.get("shared").map(String::as_str), Some("base"));
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("example.com"), ("example.com", None));
        assert_eq!(split_host_port("example.com:8080"), ("example.com", Some(8080)));
        assert_eq!(split_host_port("example.com:bad"), ("example.com:bad", None));
    }

    #[test]
    fn test_clean_hostname() {
        assert_eq!(clean_hostname("Example.COM"), "example.com");
        assert_eq!(clean_hostname("example.com, other.com"), "example.com");
        assert_eq!(clean_hostname("example.com extra"), "example.com");
    }
}
