use std::io;

use thiserror::Error;

/// Result type used across the meshroute core crate.
pub type Result<T> = std::result::Result<T, MeshRouteError>;

/// Canonical error representation shared by the workspace.
#[derive(Debug, Error)]
pub enum MeshRouteError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("deserialization error: {0}")]
    DeserializationError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("rule error: {0}")]
    RuleError(String),

    #[error("logging setup failed: {0}")]
    LoggingError(String),

    #[error("general error: {0}")]
    GeneralError(String),
}

impl From<serde_json::Error> for MeshRouteError {
    fn from(err: serde_json::Error) -> Self {
        MeshRouteError::DeserializationError(err.to_string())
    }
}

impl From<anyhow::Error> for MeshRouteError {
    fn from(err: anyhow::Error) -> Self {
        MeshRouteError::GeneralError(err.to_string())
    }
}

/// Dedicated configuration error used by the configuration module.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("required environment variable missing: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for environment variable {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

impl From<ConfigError> for MeshRouteError {
    fn from(value: ConfigError) -> Self {
        MeshRouteError::ConfigError(value.to_string())
    }
}
