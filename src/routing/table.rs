//! Route-table compilation and resolution.
//!
//! A table compiles its declared route list into either a radix trie or an
//! ordered regex list, then resolves requests against it: runtime filters
//! are evaluated per attempt, forced-protocol coercion preempts the action,
//! and the matched action runs with the match arguments.

use hyper::{Body, Response};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{RutaError, RutaResult};
use crate::geo;
use crate::matcher::PathTrie;
use crate::request::{respond, RequestContext};
use crate::util;

use super::config::{HandlerOptions, MatchType, RouteConfig, RouteTableConfig};
use super::handler::{HandlerRegistry, RouteOutcome};
use super::route::{
    runtime_checks, GeoTarget, HandledRule, MatchArgs, RedirectRule, RewriteRule, Route,
    RouteAction, RouteFilters, Scheme,
};

/// Build-time environment shared by all tables of a configuration.
pub struct BuildEnv<'a> {
    pub conds: &'a HashMap<String, String>,
    pub subs: &'a HashMap<String, String>,
    pub handlers: &'a HandlerRegistry,
    /// Default for routes that do not set `allow_write` themselves.
    pub allow_write: bool,
}

enum Matcher {
    Trie(PathTrie<Arc<Route>>),
    Regex(Vec<RegexRoute>),
}

struct RegexRoute {
    pattern: Regex,
    route: Arc<Route>,
}

/// An immutable compiled route table.
pub struct RouteTable {
    pub id: String,
    is_case_specific: bool,
    match_using_query_params: bool,
    force_proto: Option<Scheme>,
    force_port: u16,
    matcher: Matcher,
}

impl RouteTable {
    /// Compile a declared table. A single malformed route aborts the build.
    pub fn build(id: &str, conf: &RouteTableConfig, env: &BuildEnv) -> RutaResult<Self> {
        conf.validate(id)?;

        let mut matcher = match conf.match_type {
            MatchType::Trie => Matcher::Trie(PathTrie::new()),
            MatchType::Regex => Matcher::Regex(Vec::new()),
        };

        for (idx, decl) in conf.routes.iter().enumerate() {
            let in_table = |e: RutaError| {
                RutaError::config(format!("route table '{}', route {}: {}", id, idx, e))
            };
            let Some((on, route)) = compile_route(decl, conf, env).map_err(in_table)? else {
                debug!(table = id, on = %decl.on, "route dropped by conds");
                continue;
            };
            let route = Arc::new(route);
            match &mut matcher {
                Matcher::Trie(trie) => {
                    let key = if conf.is_case_specific {
                        on
                    } else {
                        on.to_lowercase()
                    };
                    trie.insert(&key, route).map_err(in_table)?;
                }
                Matcher::Regex(list) => {
                    let pattern = RegexBuilder::new(&on)
                        .case_insensitive(!conf.is_case_specific)
                        .build()
                        .map_err(|e| in_table(e.into()))?;
                    list.push(RegexRoute { pattern, route });
                }
            }
        }

        Ok(Self {
            id: id.to_string(),
            is_case_specific: conf.is_case_specific,
            match_using_query_params: conf.match_using_query_params,
            force_proto: conf.force_proto,
            force_port: conf.force_port,
            matcher,
        })
    }

    /// Attempt to match the request against this table and run the matched
    /// action. Action failures are logged and converted to a 500 response;
    /// the request still counts as handled.
    pub async fn resolve(&self, ctx: &mut RequestContext) -> RouteOutcome {
        let key = self.build_key(ctx);

        let hit = match &self.matcher {
            Matcher::Trie(trie) => trie
                .find(&key, |route| runtime_checks(ctx, &route.filters))
                .map(|(route, len)| {
                    let args = MatchArgs {
                        matched: key[..len].to_string(),
                        tail: key[len..].to_string(),
                        key: key.clone(),
                        captures: Vec::new(),
                    };
                    (route.clone(), args)
                })
                .filter(|(route, args)| match &route.filters.post_match {
                    Some(re) => re.is_match(&args.tail),
                    None => true,
                }),
            Matcher::Regex(list) => list.iter().find_map(|entry| {
                let caps = entry.pattern.captures(&key)?;
                if !runtime_checks(ctx, &entry.route.filters) {
                    return None;
                }
                let whole = caps.get(0)?;
                let args = MatchArgs {
                    matched: whole.as_str().to_string(),
                    tail: key[whole.end()..].to_string(),
                    key: key.clone(),
                    captures: caps
                        .iter()
                        .map(|c| c.map(|m| m.as_str().to_string()))
                        .collect(),
                };
                Some((entry.route.clone(), args))
            }),
        };

        let Some((route, args)) = hit else {
            return RouteOutcome::Unhandled;
        };

        if let Some(resp) = self.force_proto_redirect(ctx, &route) {
            return RouteOutcome::Response(resp);
        }

        self.dispatch(ctx, &route, &args).await
    }

    fn build_key(&self, ctx: &RequestContext) -> String {
        let path = if self.is_case_specific {
            &ctx.path
        } else {
            &ctx.normalized_path
        };
        if self.match_using_query_params {
            format!("{}?{}", path, ctx.query)
        } else {
            path.clone()
        }
    }

    /// Protocol coercion: when the route (or this table) forces a scheme
    /// the request does not use, redirect before running the action.
    fn force_proto_redirect(
        &self,
        ctx: &RequestContext,
        route: &Route,
    ) -> Option<Response<Body>> {
        let forced = route.filters.force_proto.or(self.force_proto)?;
        if forced == ctx.scheme {
            return None;
        }
        let port = if route.filters.force_port != 0 {
            route.filters.force_port
        } else {
            self.force_port
        };
        let authority = if port != 0 && port != forced.default_port() {
            format!("{}:{}", ctx.hostname, port)
        } else {
            ctx.hostname.clone()
        };
        let location = format!("{}://{}{}", forced, authority, ctx.url);
        Some(respond::redirect_response(ctx, 301, &location))
    }

    async fn dispatch(
        &self,
        ctx: &mut RequestContext,
        route: &Arc<Route>,
        args: &MatchArgs,
    ) -> RouteOutcome {
        let result = match &route.action {
            RouteAction::Redirect(rule) => Ok(handle_matched_redirect(ctx, rule)),
            RouteAction::Rewrite(rule) => Ok(handle_matched_rewrite(ctx, rule)),
            RouteAction::Handled(rule) => {
                if let Some(t) = rule.options.timeout {
                    ctx.timeout = t;
                }
                rule.handler.handle(ctx, route, args).await
            }
        };
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(table = %self.id, url = %ctx.url, "route action failed: {}", e);
                RouteOutcome::Response(respond::error_response(&e.to_http()))
            }
        }
    }
}

fn handle_matched_redirect(ctx: &RequestContext, rule: &RedirectRule) -> RouteOutcome {
    let suffix = if rule.keep_params && !ctx.query.is_empty() {
        if rule.location.contains('?') {
            format!("&{}", ctx.query)
        } else {
            format!("?{}", ctx.query)
        }
    } else {
        String::new()
    };

    if let Some(geo) = &rule.geo_target {
        return RouteOutcome::Response(respond::geo_redirect_page(ctx, geo, &suffix));
    }

    let location = format!("{}{}", rule.location, suffix);
    RouteOutcome::Response(respond::redirect_response(ctx, rule.code, &location))
}

fn handle_matched_rewrite(ctx: &RequestContext, rule: &RewriteRule) -> RouteOutcome {
    if rule.status != 0 {
        return RouteOutcome::Response(respond::status_response(rule.status));
    }

    let new_url = if rule.match_params {
        rule.pattern
            .replace(&ctx.url, rule.replace.as_str())
            .into_owned()
    } else {
        let new_path = rule
            .pattern
            .replace(&ctx.path, rule.replace.as_str())
            .into_owned();
        // The pre-existing query is re-attached with '&'; rewrite targets
        // carrying their own '?' rely on this.
        if ctx.query.is_empty() {
            new_path
        } else {
            format!("{}&{}", new_path, ctx.query)
        }
    };

    if rule.redirect_code != 0 {
        return RouteOutcome::Response(respond::redirect_response(
            ctx,
            rule.redirect_code,
            &new_url,
        ));
    }

    if new_url != ctx.url {
        return RouteOutcome::Rewrite {
            url: new_url,
            last: rule.is_last,
        };
    }
    RouteOutcome::Unhandled
}

/// Compile one declared route, or `None` when its conds drop it.
fn compile_route(
    decl: &RouteConfig,
    conf: &RouteTableConfig,
    env: &BuildEnv,
) -> RutaResult<Option<(String, Route)>> {
    if let Some(conds) = &decl.conds {
        for (key, value) in conds {
            let expected = util::substitute(value, env.subs);
            if env.conds.get(key) != Some(&expected) {
                return Ok(None);
            }
        }
    }

    let sub = |s: &String| util::substitute(s, env.subs);
    let on = sub(&decl.on);

    let method_match = match decl.method_match.as_ref().map(sub) {
        Some(m) if m.is_empty() => None,
        Some(m) => {
            if !util::is_method_valid(&m) {
                return Err(RutaError::config(format!("invalid method_match '{}'", m)));
            }
            Some(m)
        }
        None => None,
    };
    let host_match = match decl.host_match.as_ref().map(sub) {
        Some(h) if h.is_empty() => None,
        Some(h) => {
            if !util::is_hostname_valid(&h) {
                return Err(RutaError::config(format!("invalid host_match '{}'", h)));
            }
            Some(h.to_lowercase())
        }
        None => None,
    };
    let post_match = decl
        .post_match
        .as_ref()
        .map(|p| {
            RegexBuilder::new(&sub(p))
                .case_insensitive(!conf.is_case_specific)
                .build()
        })
        .transpose()?;

    let filters = RouteFilters {
        method_match,
        host_match,
        port_match: decl.port_match.unwrap_or(0),
        proto_match: decl.proto_match,
        allow_write: decl.allow_write.unwrap_or(env.allow_write),
        force_proto: decl.force_proto,
        force_port: decl.force_port.unwrap_or(0),
        post_match,
    };

    let action = if let Some(rewrite) = &decl.rewrite {
        let pattern = RegexBuilder::new(&sub(rewrite))
            .case_insensitive(!conf.is_case_specific)
            .build()?;
        let replace = decl.replace.as_ref().map(sub).unwrap_or_default();
        let mut redirect_code = decl.redirect_code.unwrap_or(0);
        if redirect_code == 0
            && (replace.starts_with("http:") || replace.starts_with("https:"))
        {
            redirect_code = conf.default_redirect_code;
        }
        if redirect_code != 0 && !(301..=308).contains(&redirect_code) {
            return Err(RutaError::config(format!(
                "rewrite redirect_code {} outside 301..=308",
                redirect_code
            )));
        }
        let status = decl.status.unwrap_or(0);
        if status != 0 && !(400..=505).contains(&status) {
            return Err(RutaError::config(format!(
                "rewrite status {} outside 400..=505",
                status
            )));
        }
        RouteAction::Rewrite(RewriteRule {
            pattern,
            replace,
            match_params: decl.match_params.unwrap_or(false),
            redirect_code,
            status,
            is_last: decl.is_last.unwrap_or(false),
        })
    } else if let Some(redirect) = &decl.redirect {
        let location = sub(redirect);
        if location.is_empty() {
            return Err(RutaError::config(
                "redirect destination must have a host or pathname",
            ));
        }
        let code = decl.code.unwrap_or(conf.default_redirect_code);
        if !(300..=399).contains(&code) {
            return Err(RutaError::config(format!(
                "redirect code {} outside 300..=399",
                code
            )));
        }
        let geo_target = match &decl.geo_target {
            Some(map) => {
                let substituted: HashMap<String, String> =
                    map.iter().map(|(k, v)| (k.clone(), sub(v))).collect();
                Some(GeoTarget {
                    entries: geo::expand_geo_target(&substituted)?,
                    fallback: location.clone(),
                })
            }
            None => None,
        };
        RouteAction::Redirect(RedirectRule {
            location,
            code,
            keep_params: decl.keep_params.unwrap_or(false),
            geo_target,
        })
    } else {
        let name = decl
            .do_
            .as_ref()
            .map(sub)
            .or_else(|| conf.default_handler.clone())
            .ok_or_else(|| {
                RutaError::config("route names no handler and the table has no default_handler")
            })?;
        let handler = env
            .handlers
            .get(&name)
            .ok_or_else(|| RutaError::config(format!("unknown route handler '{}'", name)))?;
        let options = substitute_options(decl.options.clone().unwrap_or_default(), env);
        RouteAction::Handled(HandledRule {
            name,
            handler,
            options,
        })
    };

    Ok(Some((on, Route { filters, action })))
}

/// Apply `%name%` substitution to every string field of handler options.
fn substitute_options(mut options: HandlerOptions, env: &BuildEnv) -> HandlerOptions {
    let sub = |s: &String| util::substitute(s, env.subs);
    if let Some(root) = &options.root {
        options.root = Some(sub(root));
    }
    if let Some(proxy) = &mut options.proxy {
        proxy.hostname = proxy.hostname.as_ref().map(sub);
        proxy.path = proxy.path.as_ref().map(sub);
        proxy.path_match = proxy.path_match.as_ref().map(sub);
        proxy.path_replace = proxy.path_replace.as_ref().map(sub);
        proxy.query = proxy.query.as_ref().map(sub);
        proxy.auth = proxy.auth.as_ref().map(sub);
        if let Some(headers) = &mut proxy.headers {
            *headers = headers.iter().map(|(k, v)| (k.clone(), sub(v))).collect();
        }
    }
    options
}
