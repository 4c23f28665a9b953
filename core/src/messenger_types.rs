/// Shared data model: messages, presence entries, users and UI events
use crate::error::{ChatError, ErrorKind};
use crate::session::ConnectionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Delivery status of a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        };
        f.write_str(s)
    }
}

impl FromStr for MessageStatus {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            other => Err(ChatError::request(
                None,
                format!("Unknown message status: {}", other),
            )),
        }
    }
}

/// A chat message as stored by the durable API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(alias = "sender", deserialize_with = "user_ref")]
    pub sender_id: String,
    #[serde(alias = "receiver", deserialize_with = "user_ref")]
    pub receiver_id: String,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: MessageStatus,
}

impl Message {
    /// The other party of this message, seen from `local_id`
    pub fn counterpart(&self, local_id: &str) -> &str {
        if self.sender_id == local_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    /// Whether this message belongs to the conversation between `local_id` and `peer_id`
    pub fn is_between(&self, local_id: &str, peer_id: &str) -> bool {
        (self.sender_id == local_id && self.receiver_id == peer_id)
            || (self.sender_id == peer_id && self.receiver_id == local_id)
    }
}

/// Sender/receiver may arrive as a bare id or as a populated user document
#[derive(Deserialize)]
#[serde(untagged)]
enum UserRef {
    Id(String),
    Populated {
        #[serde(alias = "_id")]
        id: String,
    },
}

fn user_ref<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match UserRef::deserialize(deserializer)? {
        UserRef::Id(id) => id,
        UserRef::Populated { id } => id,
    })
}

/// One active peer as announced over the realtime channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    #[serde(default)]
    pub username: String,
}

/// A known user from `GET /api/users`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// State changes published to the UI layer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// The realtime channel changed state
    ConnectionChanged { state: ConnectionState },
    /// A presence snapshot replaced the active user set
    PresenceUpdated { users: Vec<PresenceEntry> },
    /// History for the selected peer finished loading
    ConversationLoaded { peer_id: String, count: usize },
    /// A message was appended to the selected conversation
    MessageAppended { message: Message },
    /// A pushed message for a conversation that is not selected
    MessageReceived { message: Message },
    /// A message in the selected conversation changed status
    StatusUpdated { message_id: String, status: MessageStatus },
    /// A user-visible error
    Error { kind: ErrorKind, message: String },
}

impl ChatEvent {
    pub fn error(err: &ChatError) -> Self {
        ChatEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
