//! Frames exchanged over the persistent connection. Every frame is a JSON
//! object of the shape `{"event": <name>, "data": <payload>}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ErrorFrame, Message, MessageSeenRequest, SendMessageRequest};

/// Identity carried by a `register` frame: either the bare id or `{"userId": ...}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RegisterPayload {
    Identity(Uuid),
    Object {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
}

impl RegisterPayload {
    #[must_use]
    pub const fn user_id(&self) -> Uuid {
        match self {
            Self::Identity(user_id) | Self::Object { user_id } => *user_id,
        }
    }
}

/// Client to server frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
    Register(RegisterPayload),
    SendMessage(SendMessageRequest),
    MessageSeen(MessageSeenRequest),
}

impl ClientFrame {
    #[must_use]
    pub const fn event(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::SendMessage(_) => "sendMessage",
            Self::MessageSeen(_) => "messageSeen",
        }
    }
}

/// A persisted message addressed to one conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub conversation_id: Uuid,
    pub message: Message,
}

/// Another member has caught up on a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeenEvent {
    pub conversation_id: Uuid,
    pub seen_by: Uuid,
    pub seen_at: DateTime<Utc>,
}

/// Server to client frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerFrame {
    /// New message in a conversation the receiver belongs to.
    GetMessage(MessageEvent),
    /// Echo of the receiver's own send, delivered to their other connections.
    MessageSent(MessageEvent),
    MessagesSeen(SeenEvent),
    Error(ErrorFrame),
}

impl ServerFrame {
    #[must_use]
    pub const fn event(&self) -> &'static str {
        match self {
            Self::GetMessage(_) => "getMessage",
            Self::MessageSent(_) => "messageSent",
            Self::MessagesSeen(_) => "messagesSeen",
            Self::Error(_) => "error",
        }
    }
}
