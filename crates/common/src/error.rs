//! Error types for routeprobe messages and capabilities

use thiserror::Error;

/// Result type alias using the common Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building messages or querying capabilities
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service '{key}' is not a {expected}")]
    ServiceType { key: String, expected: &'static str },

    #[error("Dispatch error: {0}")]
    Dispatch(String),
}

impl From<http::uri::InvalidUri> for Error {
    fn from(e: http::uri::InvalidUri) -> Self {
        Error::InvalidUri {
            uri: String::new(),
            reason: e.to_string(),
        }
    }
}

impl From<http::method::InvalidMethod> for Error {
    fn from(e: http::method::InvalidMethod) -> Self {
        Error::InvalidMethod(e.to_string())
    }
}
