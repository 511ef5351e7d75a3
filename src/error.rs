use std::fmt;
use thiserror::Error;

/// Main error type for the ruta routing engine
#[derive(Error, Debug, Clone)]
pub enum RutaError {
    /// Configuration related errors (malformed host/route/table declarations)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Routing errors raised while resolving a request
    #[error("Routing error: {message}")]
    Routing { message: String },

    /// Proxy upstream errors
    #[error("Proxy error: {message}")]
    Proxy { message: String },

    /// Network related errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Timeout errors
    #[error("Operation timed out after {millis}ms: {operation}")]
    Timeout { millis: u64, operation: String },

    /// IO related errors
    #[error("IO error: {message}")]
    Io { message: String },

    /// Internal server errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// A status-bearing failure surfaced to the client as-is
    #[error("{0}")]
    Http(#[from] HttpError),
}

impl RutaError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a routing error
    pub fn routing<S: Into<String>>(message: S) -> Self {
        Self::Routing {
            message: message.into(),
        }
    }

    /// Create a proxy error
    pub fn proxy<S: Into<String>>(message: S) -> Self {
        Self::Proxy {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(millis: u64, operation: S) -> Self {
        Self::Timeout {
            millis,
            operation: operation.into(),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Map this error to the status-bearing form shown to the client.
    ///
    /// Proxy, network and timeout failures surface as 502 (the upstream
    /// leg failed); everything else is an internal 500 unless the error
    /// already carries a status.
    pub fn to_http(&self) -> HttpError {
        match self {
            RutaError::Http(e) => e.clone(),
            RutaError::Proxy { message } => HttpError::with_message(502, message.clone()),
            RutaError::Network { .. } | RutaError::Timeout { .. } => HttpError::new(502),
            _ => HttpError::new(500),
        }
    }
}

/// Result type alias for ruta operations
pub type RutaResult<T> = Result<T, RutaError>;

/// A failure value carrying an HTTP status code and a message.
///
/// The status must lie in [100, 599]; anything else collapses to 500.
/// When no message is given it is defaulted from the status phrase table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub status: u16,
    pub message: String,
}

impl HttpError {
    pub fn new(status: u16) -> Self {
        let status = if (100..=599).contains(&status) {
            status
        } else {
            500
        };
        Self {
            status,
            message: status_phrase(status).to_string(),
        }
    }

    pub fn with_message<S: Into<String>>(status: u16, message: S) -> Self {
        let mut err = Self::new(status);
        err.message = message.into();
        err
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}: {}", self.status, self.message)
    }
}

impl std::error::Error for HttpError {}

/// Standard reason phrase for a status code, or "Unknown Error" for codes
/// without one.
pub fn status_phrase(status: u16) -> &'static str {
    hyper::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Error")
}

/// Convert from std::io::Error to RutaError
impl From<std::io::Error> for RutaError {
    fn from(err: std::io::Error) -> Self {
        RutaError::io(err.to_string())
    }
}

/// Convert from hyper::Error to RutaError
impl From<hyper::Error> for RutaError {
    fn from(err: hyper::Error) -> Self {
        if err.is_connect() {
            RutaError::network(format!("Connection error: {}", err))
        } else {
            RutaError::network(format!("HTTP error: {}", err))
        }
    }
}

/// Convert from hyper::http::Error to RutaError
impl From<hyper::http::Error> for RutaError {
    fn from(err: hyper::http::Error) -> Self {
        RutaError::network(format!("HTTP error: {}", err))
    }
}

/// Convert from hyper::http::uri::InvalidUri to RutaError
impl From<hyper::http::uri::InvalidUri> for RutaError {
    fn from(err: hyper::http::uri::InvalidUri) -> Self {
        RutaError::proxy(format!("Invalid URI: {}", err))
    }
}

/// Convert from regex::Error to RutaError
impl From<regex::Error> for RutaError {
    fn from(err: regex::Error) -> Self {
        RutaError::config(format!("Invalid pattern: {}", err))
    }
}

/// Convert from toml::de::Error to RutaError
impl From<toml::de::Error> for RutaError {
    fn from(err: toml::de::Error) -> Self {
        RutaError::config(format!("TOML parsing error: {}", err))
    }
}

/// Convert from serde_json::Error to RutaError
impl From<serde_json::Error> for RutaError {
    fn from(err: serde_json::Error) -> Self {
        RutaError::internal(format!("JSON serialization error: {}", err))
    }
}

/// Convert from notify::Error to RutaError
impl From<notify::Error> for RutaError {
    fn from(err: notify::Error) -> Self {
        RutaError::io(format!("File watching error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let config_err = RutaError::config("duplicate hostname");
        assert!(matches!(config_err, RutaError::Config { .. }));
        assert_eq!(
            config_err.to_string(),
            "Configuration error: duplicate hostname"
        );

        let timeout_err = RutaError::timeout(20000, "upstream request");
        assert_eq!(
            timeout_err.to_string(),
            "Operation timed out after 20000ms: upstream request"
        );
    }

    #[test]
    fn test_http_error_defaults() {
        let err = HttpError::new(404);
        assert_eq!(err.status, 404);
        assert_eq!(err.message, "Not Found");

        // Out-of-range codes collapse to 500
        let err = HttpError::new(42);
        assert_eq!(err.status, 500);
        assert_eq!(err.message, "Internal Server Error");
        assert_eq!(HttpError::new(600).status, 500);

        let err = HttpError::with_message(502, "Proxy hostname not set");
        assert_eq!(err.status, 502);
        assert_eq!(err.message, "Proxy hostname not set");
    }

    #[test]
    fn test_error_to_http_mapping() {
        assert_eq!(RutaError::proxy("no upstream").to_http().status, 502);
        assert_eq!(RutaError::timeout(5, "dial").to_http().status, 502);
        assert_eq!(RutaError::internal("boom").to_http().status, 500);
        assert_eq!(RutaError::Http(HttpError::new(404)).to_http().status, 404);
    }

    #[test]
    fn test_status_phrases() {
        assert_eq!(status_phrase(200), "OK");
        assert_eq!(status_phrase(503), "Service Unavailable");
        assert_eq!(status_phrase(599), "Unknown Error");
    }
}
