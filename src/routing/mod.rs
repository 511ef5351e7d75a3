//! The routing core: declarative configuration, compiled route tables and
//! the host table that binds hostnames to them.
//!
//! Tables are built once and then read-only; reconfiguration builds a new
//! graph off to the side and swaps it at the engine boundary.

pub mod builtin;
pub mod config;
pub mod handler;
pub mod host;
pub mod route;
pub mod table;

pub use config::{
    HandlerOptions, HostSection, MatchType, ProxyOptions, RouteConfig, RouteTableConfig,
};
pub use handler::{HandlerRegistry, RouteHandler, RouteOutcome};
pub use host::{HostConfig, HostEntry, HostTable, WILDCARD_HOST};
pub use route::{runtime_checks, MatchArgs, Route, RouteAction, RouteFilters, Scheme};
pub use table::{BuildEnv, RouteTable};
