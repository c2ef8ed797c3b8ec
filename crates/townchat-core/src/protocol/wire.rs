//! Client and server event encodings

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::WireError;
use crate::message::{Message, MessageKind};

// ----------------------------------------------------------------------------
// Client → Server
// ----------------------------------------------------------------------------

/// Events this client transmits
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ClientEvent {
    /// Authenticate the connection
    Auth { token: String },
    /// Request conversation history
    Fetch(FetchRequest),
    /// Post a new message
    Message {
        content: String,
        #[serde(rename = "type")]
        kind: MessageKind,
    },
    /// Act on an existing item of the conversation
    Update {
        #[serde(rename = "type")]
        action: UpdateAction,
        content: String,
    },
}

impl ClientEvent {
    /// Name of the `event` field, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Auth { .. } => "auth",
            ClientEvent::Fetch(_) => "fetch",
            ClientEvent::Message { .. } => "message",
            ClientEvent::Update { .. } => "update",
        }
    }

    /// Encode as a JSON text frame
    pub fn to_frame(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Optional paging of a history request
///
/// All fields are omitted when unset, so the default request encodes as the
/// bare `{"event":"fetch"}` and the server applies its own page size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<FetchDirection>,
    /// Server-side cursor timestamp (ISO 8601)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl FetchRequest {
    /// Whether the server answers this request newest-first
    ///
    /// Pages taken `after` a cursor come back in chronological order.
    pub fn newest_first(&self) -> bool {
        self.direction != Some(FetchDirection::After)
    }
}

/// Which side of `time` the history page is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchDirection {
    Before,
    After,
}

/// Actions carried by an `update` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    /// Sign the document whose id is the event content
    Sign,
}

// ----------------------------------------------------------------------------
// Server → Client
// ----------------------------------------------------------------------------

/// Outcome carried by an `auth` acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    #[default]
    Ok,
    Failed,
}

/// Events this client receives
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Authentication acknowledgement; a missing status means success
    Auth { status: AuthStatus },
    /// History page, newest-first as sent by the server
    Fetch {
        messages: Vec<Message>,
        has_more: bool,
    },
    /// One live message
    Message(Message),
    /// Acknowledgement of an `update` request
    Update { status: Option<String> },
    /// Bare `{"error": ...}` frame
    Error { reason: String },
}

#[derive(Deserialize)]
struct AuthFrame {
    #[serde(default)]
    status: AuthStatus,
}

#[derive(Deserialize)]
struct FetchFrame {
    messages: Vec<Message>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Deserialize)]
struct UpdateFrame {
    #[serde(default)]
    status: Option<String>,
}

impl ServerEvent {
    /// Decode one inbound text frame
    pub fn parse(frame: &str) -> Result<Self, WireError> {
        let value: Value = serde_json::from_str(frame)?;
        let object = value.as_object().ok_or(WireError::NotAnObject)?;

        let event = match object.get("event").and_then(Value::as_str) {
            Some(event) => event.to_string(),
            None => {
                return match object.get("error") {
                    Some(Value::String(reason)) => Ok(ServerEvent::Error {
                        reason: reason.clone(),
                    }),
                    Some(other) => Ok(ServerEvent::Error {
                        reason: other.to_string(),
                    }),
                    None => Err(WireError::MissingEvent),
                };
            }
        };

        match event.as_str() {
            "auth" => {
                let frame: AuthFrame = serde_json::from_value(value)?;
                Ok(ServerEvent::Auth {
                    status: frame.status,
                })
            }
            "fetch" => {
                let frame: FetchFrame = serde_json::from_value(value)?;
                Ok(ServerEvent::Fetch {
                    messages: frame.messages,
                    has_more: frame.has_more,
                })
            }
            "message" => Ok(ServerEvent::Message(serde_json::from_value(value)?)),
            "update" => {
                let frame: UpdateFrame = serde_json::from_value(value)?;
                Ok(ServerEvent::Update {
                    status: frame.status,
                })
            }
            _ => Err(WireError::UnknownEvent(event)),
        }
    }

    /// Name of the event, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Auth { .. } => "auth",
            ServerEvent::Fetch { .. } => "fetch",
            ServerEvent::Message(_) => "message",
            ServerEvent::Update { .. } => "update",
            ServerEvent::Error { .. } => "error",
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
