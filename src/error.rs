//! Error types for Toolpilot.

use std::time::Duration;
use thiserror::Error;

/// Library-level error type for Toolpilot operations.
#[derive(Error, Debug)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool {0} is not supported")]
    ToolNotFound(String),

    #[error("Schema resolution failed: {0}")]
    SchemaResolution(String),

    #[error("Could not parse tool parameters ({reason}): {raw}")]
    ParameterParse { raw: String, reason: String },

    #[error("Tool invocation failed: {0}")]
    ToolInvocation(String),

    #[error("Function-calling loop exceeded maximum iterations ({0})")]
    LoopBudgetExceeded(usize),

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("Model requested unknown function: {0}")]
    UnknownFunction(String),

    #[error("Malformed function call: {0}")]
    MalformedCall(String),

    #[error("Language model error: {0}")]
    Model(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl PilotError {
    /// Whether a retry of the same call could plausibly succeed.
    ///
    /// Only transport-level failures qualify; an error reported by the
    /// backend itself is returned as-is.
    pub fn is_transient(&self) -> bool {
        match self {
            PilotError::Timeout { .. } => true,
            PilotError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// Result type alias for Toolpilot operations.
pub type Result<T> = std::result::Result<T, PilotError>;
