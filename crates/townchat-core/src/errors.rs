//! Error types for the townchat core
//!
//! Wire errors cover frames that cannot be decoded; configuration errors cover
//! invalid session settings and credential sources. `TownchatError` unifies them.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised while decoding or encoding wire frames
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame has neither an `event` nor an `error` field")]
    MissingEvent,

    #[error("Unknown event kind: {0}")]
    UnknownEvent(String),

    #[error("Frame is not a JSON object")]
    NotAnObject,
}

/// Errors raised by configuration validation and credential sources
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Failed to read credential from {path}: {source}")]
    CredentialRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Core error type for townchat sessions
#[derive(Debug, Error)]
pub enum TownchatError {
    #[error("Wire protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid conversation id: {0}")]
    InvalidConversation(String),
}

pub type Result<T> = std::result::Result<T, TownchatError>;
