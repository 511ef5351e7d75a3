pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod matcher;
pub mod proxy;
pub mod request;
pub mod routing;
pub mod util;

// Re-export commonly used types
pub use config::{ConfigManager, RoutingFile, Settings};
pub use engine::{Engine, EngineEnv, OnSentHook};
pub use error::{HttpError, RutaError, RutaResult};
pub use request::{BodyData, ParamValue, RequestContext};
pub use routing::{
    HandlerRegistry, MatchArgs, Route, RouteHandler, RouteOutcome, RouteTable, Scheme,
};
