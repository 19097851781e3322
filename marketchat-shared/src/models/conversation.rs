use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Message;

/// Conversation category. Only two-party direct conversations exist today; new
/// kinds plug in through their own preview resolver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
}

impl ConversationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
        }
    }
}

impl TryFrom<&str> for ConversationKind {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "direct" => Ok(Self::Direct),
            _ => Err("invalid conversation kind"),
        }
    }
}

/// A conversation as shown in a member's inbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPreview {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub members: Vec<Uuid>,
    /// Display title resolved for the viewer, usually the counterparty's name.
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    /// The latest message was written by someone else and the viewer has not seen it.
    pub unseen: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Opens (or reuses) the direct conversation with another user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub counterparty_id: Uuid,
}

/// Result of a seen acknowledgement issued over HTTP.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeenReceipt {
    pub conversation_id: Uuid,
    /// Number of messages newly marked as seen by the caller.
    pub marked: usize,
}
