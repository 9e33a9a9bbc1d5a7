//! Error types for the harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    /// Container missing, of the wrong type or unresolvable; missing options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A shared resource (output capture) could not be acquired
    #[error("Resource error: {0}")]
    Resource(String),

    /// The harness was driven out of order
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Redirect limit of {limit} reached at {uri}")]
    RedirectLimit { limit: usize, uri: String },

    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error(transparent)]
    Message(#[from] routeprobe_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
