use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{ConversationKind, Message};
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use super::{
    ConversationRecord, ConversationStore, ConversationSummary, NewMessage, StoreError, direct_key,
};

const CONVERSATION_COLUMNS: &str = "id, kind, members, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, media, seen_by, created_at";

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: Uuid,
    kind: String,
    members: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConversationRow> for ConversationRecord {
    type Error = StoreError;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        let kind = ConversationKind::try_from(row.kind.as_str())
            .map_err(|_| StoreError::Corrupt(format!("unknown conversation kind '{}'", row.kind)))?;
        Ok(Self {
            id: row.id,
            kind,
            members: row.members,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: Option<String>,
    media: Vec<String>,
    seen_by: Vec<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            content: row.content,
            media: row.media,
            seen_by: row.seen_by.into_iter().collect::<BTreeSet<_>>(),
            created_at: row.created_at,
        }
    }
}

/// Conversation row joined with its newest message, if any.
#[derive(Debug, FromRow)]
struct SummaryRow {
    #[sqlx(flatten)]
    conversation: ConversationRow,
    message_id: Option<Uuid>,
    sender_id: Option<Uuid>,
    content: Option<String>,
    media: Option<Vec<String>>,
    seen_by: Option<Vec<Uuid>>,
    message_created_at: Option<DateTime<Utc>>,
}

impl TryFrom<SummaryRow> for ConversationSummary {
    type Error = StoreError;

    fn try_from(row: SummaryRow) -> Result<Self, Self::Error> {
        let last_message = match (row.message_id, row.sender_id, row.message_created_at) {
            (Some(id), Some(sender_id), Some(created_at)) => Some(Message {
                id,
                conversation_id: row.conversation.id,
                sender_id,
                content: row.content,
                media: row.media.unwrap_or_default(),
                seen_by: row.seen_by.unwrap_or_default().into_iter().collect(),
                created_at,
            }),
            _ => None,
        };

        Ok(Self {
            conversation: ConversationRecord::try_from(row.conversation)?,
            last_message,
        })
    }
}

/// Postgres-backed store over the `marketchat` schema.
#[derive(Debug, Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conversation_by_direct_key(&self, key: &str) -> Result<ConversationRecord, StoreError> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM marketchat.conversations WHERE direct_key = $1"
        ))
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        ConversationRecord::try_from(row)
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    #[instrument(name = "store.find_or_create_direct", skip(self), err)]
    async fn find_or_create_direct(
        &self,
        first: Uuid,
        second: Uuid,
    ) -> Result<(ConversationRecord, bool), StoreError> {
        let key = direct_key(first, second);

        let inserted = sqlx::query_as::<_, ConversationRow>(&format!(
            "INSERT INTO marketchat.conversations (id, kind, members, direct_key)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (direct_key) DO NOTHING
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(ConversationKind::Direct.as_str())
        .bind(vec![first, second])
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => Ok((ConversationRecord::try_from(row)?, true)),
            None => Ok((self.conversation_by_direct_key(&key).await?, false)),
        }
    }

    async fn find_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM marketchat.conversations WHERE id = $1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?
        .map(ConversationRecord::try_from)
        .transpose()
    }

    #[instrument(
        name = "store.append_message",
        skip(self, message),
        fields(conversation_id = %message.conversation_id, sender_id = %message.sender_id),
        err
    )]
    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes appends to this conversation.
        let members: Option<Vec<Uuid>> = sqlx::query_scalar(
            "SELECT members FROM marketchat.conversations WHERE id = $1 FOR UPDATE",
        )
        .bind(message.conversation_id)
        .fetch_optional(&mut *tx)
        .await?;

        let members = members.ok_or(StoreError::ConversationNotFound(message.conversation_id))?;
        if !members.contains(&message.sender_id) {
            return Err(StoreError::NotMember {
                conversation_id: message.conversation_id,
                user_id: message.sender_id,
            });
        }

        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "INSERT INTO marketchat.messages (id, conversation_id, sender_id, content, media, created_at)
             SELECT $1, c.id, $3, $4, $5,
                    GREATEST(clock_timestamp(), c.last_message_at + INTERVAL '1 microsecond')
             FROM marketchat.conversations c
             WHERE c.id = $2
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(&message.media)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE marketchat.conversations
             SET last_message_at = $2, updated_at = $2
             WHERE id = $1",
        )
        .bind(message.conversation_id)
        .bind(row.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        metrics::counter!("marketchat_store_appends_total", "backend" => "postgres").increment(1);
        Ok(row.into())
    }

    #[instrument(name = "store.mark_seen", skip(self), err)]
    async fn mark_seen(
        &self,
        conversation_id: Uuid,
        viewer: Uuid,
    ) -> Result<Vec<Uuid>, StoreError> {
        let marked = sqlx::query_scalar::<_, Uuid>(
            "UPDATE marketchat.messages
             SET seen_by = array_append(seen_by, $2)
             WHERE conversation_id = $1
               AND sender_id <> $2
               AND NOT ($2 = ANY(seen_by))
             RETURNING id",
        )
        .bind(conversation_id)
        .bind(viewer)
        .fetch_all(&self.pool)
        .await?;
        Ok(marked)
    }

    async fn list_for_member(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            "SELECT c.id, c.kind, c.members, c.created_at, c.updated_at,
                    m.id AS message_id, m.sender_id, m.content, m.media, m.seen_by,
                    m.created_at AS message_created_at
             FROM marketchat.conversations c
             LEFT JOIN LATERAL (
                 SELECT id, sender_id, content, media, seen_by, created_at
                 FROM marketchat.messages
                 WHERE conversation_id = c.id
                 ORDER BY created_at DESC
                 LIMIT 1
             ) m ON TRUE
             WHERE $1 = ANY(c.members)
             ORDER BY c.updated_at DESC, c.id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ConversationSummary::try_from).collect()
    }

    async fn messages_before(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM marketchat.messages
             WHERE conversation_id = $1
               AND ($2::timestamptz IS NULL OR created_at < $2)
             ORDER BY created_at DESC
             LIMIT $3"
        ))
        .bind(conversation_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
