//! townchat Core Session Implementation
//!
//! This crate provides the transport-agnostic pieces of a townchat conversation:
//! the wire protocol, the message model and store, and the explicit session state
//! machine that sequences the `auth` → `fetch` handshake. It performs no I/O; the
//! state machine consumes channel events and host commands and returns effects
//! for a runtime to execute.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod credential;
pub mod errors;
pub mod message;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod state;
pub mod store;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ReconnectConfig, SessionConfig};
pub use credential::{CredentialSource, EnvCredential, FileCredential, StaticCredential};
pub use errors::{ConfigError, Result, TownchatError, WireError};
pub use message::{Message, MessageId, MessageKind, MessageStatus};
pub use protocol::{
    AuthStatus, ClientEvent, FetchDirection, FetchRequest, ServerEvent, UpdateAction,
};
pub use reconnect::{ExponentialBackoff, NoReconnect, ReconnectPolicy};
pub use session::{
    AuditEntry, ChannelEvent, Effect, Outgoing, SendOutcome, Session, SessionNotice, SkipReason,
    Step,
};
pub use state::{CloseReason, ConnectionState, HistoryPhase, SessionState};
pub use store::{MessageStore, MessageStoreStats};
pub use types::{
    ConversationId, Credential, Generation, GenerationCounter, SystemTimeSource, TimeSource,
    Timestamp,
};
