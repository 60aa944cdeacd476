//! Error types for the SkimmedCFG extension
use thiserror::Error;

/// Extension errors
#[derive(Error, Debug)]
pub enum SkimError {
    /// A feature-gated parameter was used while the backing node is missing
    #[error("{0}")]
    FeatureNotInstalled(String),

    /// Parameter id is not registered
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// Parameter id registered twice
    #[error("Parameter already registered: {0}")]
    DuplicateParameter(String),

    /// Value kind does not match the parameter kind
    #[error("Parameter '{id}' expects {expected}, got {found}")]
    TypeMismatch {
        /// Parameter id
        id: String,
        /// Expected kind
        expected: String,
        /// Kind of the rejected value
        found: String,
    },

    /// Numeric value outside the registered bounds
    #[error("Parameter '{id}' value {value} is outside [{min}, {max}]")]
    OutOfRange {
        /// Parameter id
        id: String,
        /// Rejected value
        value: f64,
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },

    /// Value is not one of the registered choices
    #[error("Parameter '{id}' does not accept '{value}'")]
    InvalidChoice {
        /// Parameter id
        id: String,
        /// Rejected value
        value: String,
    },

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Request file exceeds the size limit
    #[error("Request file too large: {size} bytes (limit {limit})")]
    RequestTooLarge {
        /// Actual size in bytes
        size: u64,
        /// Allowed size in bytes
        limit: u64,
    },

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for extension operations
pub type Result<T> = std::result::Result<T, SkimError>;
