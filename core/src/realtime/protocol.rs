/// Realtime channel events and their JSON text framing
use crate::error::Result;
use crate::messenger_types::{Message, MessageStatus, PresenceEntry};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Events this client emits on the realtime channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    /// Join the per-identity room
    #[serde(rename = "join")]
    Join(String),

    /// Announce self as active
    #[serde(rename = "userActive")]
    UserActive(PresenceEntry),

    /// Announce self as inactive
    #[serde(rename = "userInactive")]
    UserInactive(String),

    /// Ask for a presence snapshot; answered by `activeUsers`
    #[serde(rename = "getActiveUsers")]
    GetActiveUsers,

    /// Live fan-out of a durably stored message to its receiver
    #[serde(rename = "sendMessage")]
    SendMessage(Message),
}

/// Status change pushed for a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub message_id: String,
    pub status: MessageStatus,
}

/// Events pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(Message),

    /// Full presence snapshot
    #[serde(rename = "activeUsers")]
    ActiveUsers(Vec<PresenceEntry>),

    #[serde(rename = "messageStatus")]
    MessageStatus(StatusUpdate),
}

impl OutboundEvent {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Join(_) => "join",
            OutboundEvent::UserActive(_) => "userActive",
            OutboundEvent::UserInactive(_) => "userInactive",
            OutboundEvent::GetActiveUsers => "getActiveUsers",
            OutboundEvent::SendMessage(_) => "sendMessage",
        }
    }
}

impl InboundEvent {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::ReceiveMessage(_) => "receiveMessage",
            InboundEvent::ActiveUsers(_) => "activeUsers",
            InboundEvent::MessageStatus(_) => "messageStatus",
        }
    }
}

impl fmt::Display for OutboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutboundEvent({})", self.name())
    }
}

impl fmt::Display for InboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InboundEvent({})", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_wire_shape() {
        let join = OutboundEvent::Join("u1".into()).encode().unwrap();
        assert_eq!(join, r#"{"event":"join","data":"u1"}"#);

        let active = OutboundEvent::UserActive(PresenceEntry {
            user_id: "u1".into(),
            username: "alice".into(),
        })
        .encode()
        .unwrap();
        assert_eq!(
            active,
            r#"{"event":"userActive","data":{"userId":"u1","username":"alice"}}"#
        );

        let request = OutboundEvent::GetActiveUsers.encode().unwrap();
        assert_eq!(request, r#"{"event":"getActiveUsers"}"#);
    }

    #[test]
    fn test_inbound_snapshot_decodes() {
        let text = r#"{"event":"activeUsers","data":[{"userId":"u2","username":"bob"}]}"#;
        match InboundEvent::decode(text).unwrap() {
            InboundEvent::ActiveUsers(users) => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].user_id, "u2");
            }
            other => panic!("unexpected event {}", other),
        }
    }

    #[test]
    fn test_inbound_status_decodes() {
        let text = r#"{"event":"messageStatus","data":{"messageId":"m1","status":"read"}}"#;
        assert_eq!(
            InboundEvent::decode(text).unwrap(),
            InboundEvent::MessageStatus(StatusUpdate {
                message_id: "m1".into(),
                status: MessageStatus::Read,
            })
        );
    }

    #[test]
    fn test_unknown_event_is_an_error() {
        assert!(InboundEvent::decode(r#"{"event":"typing","data":"u2"}"#).is_err());
        assert!(InboundEvent::decode("not json").is_err());
    }
}
