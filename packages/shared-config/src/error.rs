//! Configuration error types

use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Missing required environment variable
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Value could not be parsed into the expected type
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// Connection URL with an unsupported scheme
    #[error("invalid URL format for {0}: {1}")]
    InvalidUrl(String, String),

    /// Value parsed but is outside what the service accepts
    #[error("{name} out of range: {reason}")]
    OutOfRange { name: &'static str, reason: String },

    /// Cross-field validation error
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
