use std::sync::Arc;

use shared::{
    config::server::PaginationConfig,
    models::{ConversationPreview, MessagePage, MessagePageQuery},
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    error::ChatError,
    services::previews::PreviewResolvers,
    store::{ConversationRecord, ConversationStore, ConversationSummary},
};

/// Read side: inbox listings, history pages and the unseen set. Works for
/// users without any live connection.
#[derive(Debug, Clone)]
pub struct QueryService {
    store: Arc<dyn ConversationStore>,
    previews: PreviewResolvers,
    pagination: PaginationConfig,
}

impl QueryService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        previews: PreviewResolvers,
        pagination: PaginationConfig,
    ) -> Self {
        Self {
            store,
            previews,
            pagination,
        }
    }

    /// Every conversation of `user_id`, most recently updated first.
    ///
    /// # Errors
    /// `Store` when the store or profile lookup fails.
    #[instrument(name = "query.list_conversations", skip(self), err(level = "debug"))]
    pub async fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationPreview>, ChatError> {
        let summaries = self.store.list_for_member(user_id).await?;
        let mut previews = Vec::with_capacity(summaries.len());
        for summary in summaries {
            previews.push(self.preview(user_id, summary).await?);
        }
        Ok(previews)
    }

    /// Conversations whose latest message came from someone else and has not
    /// been seen by `user_id`.
    ///
    /// # Errors
    /// `Store` when the store or profile lookup fails.
    #[instrument(name = "query.unseen_conversations", skip(self), err(level = "debug"))]
    pub async fn unseen_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationPreview>, ChatError> {
        let mut previews = self.list_conversations(user_id).await?;
        previews.retain(|preview| preview.unseen);
        Ok(previews)
    }

    /// # Errors
    /// `NotFound` for an unknown conversation, `AuthFailure` for non-members.
    pub async fn get_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<ConversationPreview, ChatError> {
        let conversation = self.member_conversation(user_id, conversation_id).await?;
        let last_message = self
            .store
            .messages_before(conversation_id, None, 1)
            .await?
            .into_iter()
            .next();

        self.preview(
            user_id,
            ConversationSummary {
                conversation,
                last_message,
            },
        )
        .await
    }

    /// One page of history strictly older than `query.before`, oldest first.
    /// `next_cursor` is the oldest returned timestamp; feed it back as
    /// `before` to continue.
    ///
    /// # Errors
    /// `NotFound` for an unknown conversation, `AuthFailure` for non-members.
    #[instrument(name = "query.paginate_messages", skip(self), err(level = "debug"))]
    pub async fn paginate_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        query: MessagePageQuery,
    ) -> Result<MessagePage, ChatError> {
        self.member_conversation(user_id, conversation_id).await?;

        let limit = self.clamp_limit(query.limit);
        let mut messages = self
            .store
            .messages_before(conversation_id, query.before, limit + 1)
            .await?;

        let has_more = messages.len() > limit;
        messages.truncate(limit);
        messages.reverse();
        let next_cursor = messages.first().map(|message| message.created_at);

        Ok(MessagePage {
            messages,
            has_more,
            next_cursor,
        })
    }

    /// Missing limits use the default; anything else is clamped into range.
    #[must_use]
    pub fn clamp_limit(&self, requested: Option<i64>) -> usize {
        let max = i64::from(self.pagination.max_limit.max(1));
        let limit = requested.map_or(i64::from(self.pagination.default_limit), |value| {
            value.clamp(1, max)
        });
        usize::try_from(limit.clamp(1, max)).unwrap_or(1)
    }

    async fn member_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<ConversationRecord, ChatError> {
        let conversation = self
            .store
            .find_conversation(conversation_id)
            .await?
            .ok_or_else(|| {
                ChatError::not_found(format!("conversation {conversation_id} does not exist"))
            })?;

        if conversation.is_member(user_id) {
            Ok(conversation)
        } else {
            Err(ChatError::auth(format!(
                "not a member of conversation {conversation_id}"
            )))
        }
    }

    async fn preview(
        &self,
        viewer: Uuid,
        summary: ConversationSummary,
    ) -> Result<ConversationPreview, ChatError> {
        let ConversationSummary {
            conversation,
            last_message,
        } = summary;
        let identity = self.previews.resolve(viewer, &conversation).await?;
        let unseen = last_message
            .as_ref()
            .is_some_and(|message| !message.is_seen_by(viewer));

        Ok(ConversationPreview {
            id: conversation.id,
            kind: conversation.kind,
            members: conversation.members,
            title: identity.title,
            thumbnail: identity.thumbnail,
            last_message,
            unseen,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        })
    }
}
