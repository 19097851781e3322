use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// A single entry in a conversation's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Store-assigned identifier.
    pub id: Uuid,
    /// Conversation the message belongs to.
    pub conversation_id: Uuid,
    /// Author of the message; always a member of the conversation.
    pub sender_id: Uuid,
    /// Optional text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Opaque attachment references, in the order the author supplied them.
    #[serde(default)]
    pub media: Vec<String>,
    /// Members other than the author who have seen the message.
    #[serde(default)]
    pub seen_by: BTreeSet<Uuid>,
    /// Server-assigned persistence time; the ordering and pagination key.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// The author always counts as having seen their own message.
    #[must_use]
    pub fn is_seen_by(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.seen_by.contains(&user_id)
    }
}

/// Payload of the `sendMessage` frame.
///
/// `conversation_id` wins when both targets are given.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub media: Vec<String>,
}

/// Payload of the `messageSeen` frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageSeenRequest {
    pub conversation_id: Uuid,
}

/// Query parameters for backward pagination over a conversation log.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MessagePageQuery {
    /// Only messages strictly older than this instant are returned. Defaults to now.
    pub before: Option<DateTime<Utc>>,
    /// Page size; clamped by the server.
    pub limit: Option<i64>,
}

/// One page of history, oldest message first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Whether messages older than `next_cursor` exist.
    pub has_more: bool,
    /// Timestamp of the oldest message in this page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<DateTime<Utc>>,
}
