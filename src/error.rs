//! Error types for configuration stores.

use thiserror::Error;

/// Main error type for configuration store operations.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Illegal parameter")]
    IllegalParam,
}

impl ConfigStoreError {
    /// Shorthand for a required field that was absent or empty.
    pub fn missing(field: impl Into<String>) -> Self {
        ConfigStoreError::MissingField(field.into())
    }
}

impl From<serde_json::Error> for ConfigStoreError {
    fn from(e: serde_json::Error) -> Self {
        ConfigStoreError::Serialization(e.to_string())
    }
}

/// Result type for configuration store operations.
pub type Result<T> = std::result::Result<T, ConfigStoreError>;
