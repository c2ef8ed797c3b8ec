//! Explicit session states
//!
//! Each state carries only the data that is meaningful while it is current. The
//! transition logic lives in [`crate::session`]; this module defines the shapes
//! and the cheap queries the host and runtime need.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::message::Message;
use crate::types::{Generation, Timestamp};

// ----------------------------------------------------------------------------
// Connection State Summary
// ----------------------------------------------------------------------------

/// Data-free view of the session state, suitable for rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Ready,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Authenticating => "Authenticating",
            ConnectionState::Ready => "Ready",
            ConnectionState::Closed => "Closed",
            ConnectionState::Failed => "Failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Session State Types
// ----------------------------------------------------------------------------

/// Full session state
#[derive(Debug, Clone)]
pub enum SessionState {
    /// Channel requested, not yet open
    Connecting(ConnectingState),
    /// Channel open, waiting for the server's `auth` acknowledgement
    Authenticating(AuthenticatingState),
    /// Handshake complete
    Ready(ReadyState),
    /// Torn down by the host
    Closed(ClosedState),
    /// Channel lost or authentication rejected
    Failed(FailedState),
}

#[derive(Debug, Clone)]
pub struct ConnectingState {
    pub generation: Generation,
    /// 0 for the initial connection, then the retry number
    pub attempt: u32,
    pub started: Timestamp,
}

#[derive(Debug, Clone)]
pub struct AuthenticatingState {
    pub generation: Generation,
    pub since: Timestamp,
    /// False while waiting for the host to supply a credential
    pub auth_sent: bool,
}

#[derive(Debug, Clone)]
pub struct ReadyState {
    pub generation: Generation,
    pub since: Timestamp,
    pub history: HistoryPhase,
}

/// Progress of the history fetch within `Ready`
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryPhase {
    /// `fetch` sent; live messages are held back until history lands
    Pending {
        queued: Vec<Message>,
        /// Order of the requested page
        newest_first: bool,
    },
    /// History applied; live messages go straight to the store
    Loaded,
}

#[derive(Debug, Clone)]
pub struct ClosedState {
    pub at: Timestamp,
    pub reason: CloseReason,
}

/// Why the host closed the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Conversation view unmounted or the host shut down
    Teardown,
    /// Host switched to another conversation
    Switched,
}

#[derive(Debug, Clone)]
pub struct FailedState {
    pub at: Timestamp,
    pub reason: String,
    /// Retry number scheduled next, if the policy allowed one
    pub retry: Option<u32>,
}

// ----------------------------------------------------------------------------
// Queries
// ----------------------------------------------------------------------------

impl SessionState {
    pub fn connection_state(&self) -> ConnectionState {
        match self {
            SessionState::Connecting(_) => ConnectionState::Connecting,
            SessionState::Authenticating(_) => ConnectionState::Authenticating,
            SessionState::Ready(_) => ConnectionState::Ready,
            SessionState::Closed(_) => ConnectionState::Closed,
            SessionState::Failed(_) => ConnectionState::Failed,
        }
    }

    pub fn state_name(&self) -> &'static str {
        self.connection_state().as_str()
    }

    /// Generation of the channel this state is bound to, if any
    pub fn generation(&self) -> Option<Generation> {
        match self {
            SessionState::Connecting(s) => Some(s.generation),
            SessionState::Authenticating(s) => Some(s.generation),
            SessionState::Ready(s) => Some(s.generation),
            SessionState::Closed(_) | SessionState::Failed(_) => None,
        }
    }

    /// Whether an open channel exists to transmit on
    pub fn channel_open(&self) -> bool {
        matches!(
            self,
            SessionState::Authenticating(_) | SessionState::Ready(_)
        )
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed(_))
    }

    /// Failed with a reconnect still scheduled
    pub fn retry_pending(&self) -> bool {
        matches!(self, SessionState::Failed(FailedState { retry: Some(_), .. }))
    }

    /// Whether the history of the current connection has been applied
    pub fn history_loaded(&self) -> bool {
        matches!(
            self,
            SessionState::Ready(ReadyState {
                history: HistoryPhase::Loaded,
                ..
            })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries() {
        let state = SessionState::Ready(ReadyState {
            generation: Generation::new(4),
            since: Timestamp::new(0),
            history: HistoryPhase::Pending {
                queued: Vec::new(),
                newest_first: true,
            },
        });

        assert_eq!(state.connection_state(), ConnectionState::Ready);
        assert_eq!(state.generation(), Some(Generation::new(4)));
        assert!(state.channel_open());
        assert!(!state.history_loaded());

        let closed = SessionState::Closed(ClosedState {
            at: Timestamp::new(1),
            reason: CloseReason::Teardown,
        });
        assert!(closed.is_terminal());
        assert!(!closed.channel_open());
        assert_eq!(closed.generation(), None);
        assert_eq!(closed.state_name(), "Closed");
        assert!(!closed.retry_pending());

        let retrying = SessionState::Failed(FailedState {
            at: Timestamp::new(2),
            reason: "lost".to_string(),
            retry: Some(1),
        });
        assert!(retrying.retry_pending());
    }
}
