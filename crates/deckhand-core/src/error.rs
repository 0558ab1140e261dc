//! Error types for configuration loading and deferred value resolution.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A required configuration value is missing or malformed.
///
/// Raised at synthesis time, before any resource is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid application name {0:?}: must start with a letter and contain only letters, digits and '-'")]
    InvalidAppName(String),

    #[error("invalid stage name {0:?}: must start with a letter and contain only letters, digits and '-'")]
    InvalidStageName(String),

    #[error("{0}")]
    Inconsistent(String),

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration file: {0}")]
    Parse(String),
}

/// Failure to resolve a deferred environment value at apply time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown secret: {0}")]
    UnknownSecret(String),

    #[error("secret {secret} has no field {field:?}")]
    UnknownSecretField { secret: String, field: String },

    #[error("resource {resource} has no attribute {attribute:?}")]
    UnknownAttribute { resource: String, attribute: String },
}
