//! Error types for the autoheal crate.

use thiserror::Error;

/// Errors raised by a persistence backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read store '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to write store '{path}': {reason}")]
    Write { path: String, reason: String },

    #[error("Failed to (de)serialize store data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse config file '{path}': {reason}")]
    Parse { path: String, reason: String },

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Top-level error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unknown {kind}: '{value}'")]
    UnknownVariant { kind: &'static str, value: String },
}

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type returned by [`crate::store::Store`] implementations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
