//! Error types for the townchat transport

use thiserror::Error;
use townchat_core::{TownchatError, WireError};

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while addressing, opening or driving a conversation channel
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported endpoint scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("Invalid endpoint template: {template} ({reason})")]
    InvalidTemplate { template: String, reason: String },

    #[error("Failed to connect to {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to encode outgoing event: {0}")]
    Encode(#[from] WireError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Session task is no longer running")]
    SessionStopped,

    #[error("Session error: {0}")]
    Session(#[from] TownchatError),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
