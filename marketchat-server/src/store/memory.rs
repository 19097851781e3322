use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use shared::models::{ConversationKind, Message};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    ConversationRecord, ConversationStore, ConversationSummary, NewMessage, StoreError, direct_key,
};

#[derive(Debug)]
struct ConversationLog {
    messages: Vec<Message>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ConversationEntry {
    id: Uuid,
    kind: ConversationKind,
    members: Vec<Uuid>,
    created_at: DateTime<Utc>,
    log: Mutex<ConversationLog>,
}

impl ConversationEntry {
    fn record(&self, updated_at: DateTime<Utc>) -> ConversationRecord {
        ConversationRecord {
            id: self.id,
            kind: self.kind,
            members: self.members.clone(),
            created_at: self.created_at,
            updated_at,
        }
    }
}

/// Process-local store. Each conversation owns a mutex that serializes its
/// appends, so unrelated conversations never contend.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<Uuid, Arc<ConversationEntry>>>,
    direct: Mutex<HashMap<String, Uuid>>,
}

impl InMemoryConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, conversation_id: Uuid) -> Option<Arc<ConversationEntry>> {
        self.conversations
            .read()
            .await
            .get(&conversation_id)
            .cloned()
    }
}

fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    #[instrument(name = "store.find_or_create_direct", skip(self))]
    async fn find_or_create_direct(
        &self,
        first: Uuid,
        second: Uuid,
    ) -> Result<(ConversationRecord, bool), StoreError> {
        let key = direct_key(first, second);
        // Held across the insert so concurrent first messages agree on one id.
        let mut direct = self.direct.lock().await;

        if let Some(id) = direct.get(&key).copied() {
            let entry = self.entry(id).await.ok_or_else(|| {
                StoreError::Corrupt(format!("direct index points at missing conversation {id}"))
            })?;
            let updated_at = entry.log.lock().await.updated_at;
            return Ok((entry.record(updated_at), false));
        }

        let now = now_micros();
        let entry = Arc::new(ConversationEntry {
            id: Uuid::new_v4(),
            kind: ConversationKind::Direct,
            members: vec![first, second],
            created_at: now,
            log: Mutex::new(ConversationLog {
                messages: Vec::new(),
                updated_at: now,
            }),
        });

        self.conversations
            .write()
            .await
            .insert(entry.id, Arc::clone(&entry));
        direct.insert(key, entry.id);
        debug!(conversation_id = %entry.id, "created direct conversation");

        Ok((entry.record(now), true))
    }

    async fn find_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        let Some(entry) = self.entry(conversation_id).await else {
            return Ok(None);
        };
        let updated_at = entry.log.lock().await.updated_at;
        Ok(Some(entry.record(updated_at)))
    }

    #[instrument(
        name = "store.append_message",
        skip(self, message),
        fields(conversation_id = %message.conversation_id, sender_id = %message.sender_id)
    )]
    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let entry = self
            .entry(message.conversation_id)
            .await
            .ok_or(StoreError::ConversationNotFound(message.conversation_id))?;

        if !entry.members.contains(&message.sender_id) {
            return Err(StoreError::NotMember {
                conversation_id: message.conversation_id,
                user_id: message.sender_id,
            });
        }

        let mut log = entry.log.lock().await;
        let mut created_at = now_micros();
        if let Some(last) = log.messages.last() {
            let floor = last.created_at + TimeDelta::microseconds(1);
            if created_at < floor {
                created_at = floor;
            }
        }

        let persisted = Message {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            media: message.media,
            seen_by: BTreeSet::new(),
            created_at,
        };
        log.messages.push(persisted.clone());
        log.updated_at = created_at;

        Ok(persisted)
    }

    #[instrument(name = "store.mark_seen", skip(self))]
    async fn mark_seen(
        &self,
        conversation_id: Uuid,
        viewer: Uuid,
    ) -> Result<Vec<Uuid>, StoreError> {
        let entry = self
            .entry(conversation_id)
            .await
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;

        let mut log = entry.log.lock().await;
        let marked = log
            .messages
            .iter_mut()
            .filter(|message| message.sender_id != viewer)
            .filter_map(|message| message.seen_by.insert(viewer).then_some(message.id))
            .collect();

        Ok(marked)
    }

    async fn list_for_member(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let entries: Vec<Arc<ConversationEntry>> = self
            .conversations
            .read()
            .await
            .values()
            .filter(|entry| entry.members.contains(&user_id))
            .cloned()
            .collect();

        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            let log = entry.log.lock().await;
            summaries.push(ConversationSummary {
                conversation: entry.record(log.updated_at),
                last_message: log.messages.last().cloned(),
            });
        }

        summaries.sort_by(|a, b| {
            b.conversation
                .updated_at
                .cmp(&a.conversation.updated_at)
                .then_with(|| a.conversation.id.cmp(&b.conversation.id))
        });
        Ok(summaries)
    }

    async fn messages_before(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let entry = self
            .entry(conversation_id)
            .await
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;

        let log = entry.log.lock().await;
        let end = before.map_or(log.messages.len(), |cursor| {
            log.messages
                .partition_point(|message| message.created_at < cursor)
        });
        let start = end.saturating_sub(limit);

        Ok(log.messages[start..end].iter().rev().cloned().collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
