//! Message model
//!
//! Messages arrive either in bulk (history) or one at a time (live). The model is
//! lenient on input: ids may be JSON strings or numbers, `content` may be null and
//! unrecognised kinds decode as [`MessageKind::Unknown`] so one odd entry does not
//! poison a whole history frame.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ----------------------------------------------------------------------------
// Message Identity
// ----------------------------------------------------------------------------

/// Server-assigned message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => MessageId(text),
            RawId::Unsigned(n) => MessageId(n.to_string()),
            RawId::Signed(n) => MessageId(n.to_string()),
        })
    }
}

// ----------------------------------------------------------------------------
// Message Kinds
// ----------------------------------------------------------------------------

/// Interpretation of a message's `content`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text
    #[default]
    Text,
    /// Reference to a shop product
    Product,
    /// Reference to a classified announcement
    Announcement,
    /// Reference to a document awaiting signature
    Document,
    /// Any kind this client does not know about
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Product => "product",
            MessageKind::Announcement => "announcement",
            MessageKind::Document => "document",
            MessageKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

// ----------------------------------------------------------------------------
// Message Record
// ----------------------------------------------------------------------------

/// One entry of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Absent for optimistic local entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(rename = "is_self", default)]
    pub author_is_self: bool,
    /// Server timestamp as sent; never used for ordering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Message {
    /// Build an optimistic entry for content this client just sent
    pub fn local(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: None,
            sender: None,
            kind,
            content: content.into(),
            status: None,
            author_is_self: true,
            created_at: None,
        }
    }

    /// Whether this entry is an unconfirmed local echo
    pub fn is_local(&self) -> bool {
        self.id.is_none() && self.author_is_self
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_and_string_ids() {
        let numeric: Message = serde_json::from_str(r#"{"id": 3, "content": "hi"}"#).unwrap();
        assert_eq!(numeric.id, Some(MessageId::new("3")));

        let text: Message =
            serde_json::from_str(r#"{"id": "6482bb48", "content": "hi"}"#).unwrap();
        assert_eq!(text.id.unwrap().as_str(), "6482bb48");
    }

    #[test]
    fn test_server_payload_fields() {
        let message: Message = serde_json::from_str(
            r#"{
                "id": "m1",
                "sender": "u1",
                "type": "product",
                "content": "/shop/42",
                "status": "delivered",
                "is_self": true,
                "created_at": "2025-09-23T21:29:41+00:00"
            }"#,
        )
        .unwrap();

        assert_eq!(message.kind, MessageKind::Product);
        assert_eq!(message.status, Some(MessageStatus::Delivered));
        assert!(message.author_is_self);
        assert!(!message.is_local());
    }

    #[test]
    fn test_lenient_content_and_kind() {
        let message: Message =
            serde_json::from_str(r#"{"id": "m2", "type": "sticker", "content": null}"#).unwrap();
        assert_eq!(message.kind, MessageKind::Unknown);
        assert_eq!(message.content, "");
        assert!(!message.author_is_self);
    }

    #[test]
    fn test_local_entry() {
        let message = Message::local(MessageKind::Text, "hello");
        assert!(message.is_local());
        assert_eq!(message.kind.as_str(), "text");
    }
}
