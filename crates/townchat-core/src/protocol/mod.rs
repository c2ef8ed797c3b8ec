//! townchat wire protocol
//!
//! JSON text frames over one persistent connection per conversation. Every frame
//! is an object whose `event` field names its kind; the server additionally sends
//! bare `{"error": "..."}` objects when it rejects a request.

pub mod wire;

pub use wire::{AuthStatus, ClientEvent, FetchDirection, FetchRequest, ServerEvent, UpdateAction};
