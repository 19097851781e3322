//! Persistence contracts for conversations and their message logs.
//!
//! A conversation's log is append-only. The store serializes appends per
//! conversation and hands out strictly increasing `created_at` values, which
//! makes the timestamp a safe pagination cursor.

pub mod memory;
pub mod postgres;
pub mod profiles;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{ConversationKind, Message};
use thiserror::Error;
use uuid::Uuid;

pub use memory::InMemoryConversationStore;
pub use postgres::PgConversationStore;
pub use profiles::{InMemoryProfileDirectory, PgProfileDirectory, ProfileDirectory, UserProfile};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("conversation {0} does not exist")]
    ConversationNotFound(Uuid),
    #[error("user {user_id} is not a member of conversation {conversation_id}")]
    NotMember { conversation_id: Uuid, user_id: Uuid },
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Conversation metadata without its log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: Uuid,
    pub kind: ConversationKind,
    /// Participants in creation order; immutable.
    pub members: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Moves forward with every appended message.
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    #[must_use]
    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }

    pub fn other_members(&self, user_id: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.members
            .iter()
            .copied()
            .filter(move |member| *member != user_id)
    }
}

/// A conversation together with the newest entry of its log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation: ConversationRecord,
    pub last_message: Option<Message>,
}

/// Message body accepted for persistence. Id and timestamp are store-assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub media: Vec<String>,
}

#[async_trait]
pub trait ConversationStore: std::fmt::Debug + Send + Sync {
    /// Returns the direct conversation between two users, creating it when it
    /// does not exist yet. The flag reports whether this call created it.
    async fn find_or_create_direct(
        &self,
        first: Uuid,
        second: Uuid,
    ) -> Result<(ConversationRecord, bool), StoreError>;

    async fn find_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<ConversationRecord>, StoreError>;

    /// Appends to the log and returns the persisted message.
    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Adds `viewer` to `seen_by` on every message authored by someone else
    /// that the viewer has not seen yet. Returns the ids that changed.
    async fn mark_seen(&self, conversation_id: Uuid, viewer: Uuid)
    -> Result<Vec<Uuid>, StoreError>;

    /// Conversations `user_id` belongs to, most recently updated first.
    async fn list_for_member(&self, user_id: Uuid)
    -> Result<Vec<ConversationSummary>, StoreError>;

    /// Up to `limit` messages strictly older than `before` (the whole log when
    /// `None`), newest first.
    async fn messages_before(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Order-insensitive key identifying the direct conversation of a pair.
#[must_use]
pub fn direct_key(first: Uuid, second: Uuid) -> String {
    let (low, high) = if first <= second {
        (first, second)
    } else {
        (second, first)
    };
    format!("{low}:{high}")
}
