use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use shared::models::{Message, MessageEvent, SeenEvent, SendMessageRequest, ServerFrame};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    error::ChatError,
    realtime::registry::{ConnectionId, ConnectionRegistry, FanoutReport},
    store::{ConversationRecord, ConversationStore, NewMessage},
};

/// Result of a persisted send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub conversation: ConversationRecord,
    pub conversation_created: bool,
    pub message: Message,
    /// `getMessage` frames to the other members.
    pub recipients: FanoutReport,
    /// `messageSent` frames to the sender's other connections.
    pub echoes: FanoutReport,
}

#[derive(Debug, Clone)]
pub struct SeenOutcome {
    pub conversation_id: Uuid,
    /// Messages that changed state; empty when the ack was a no-op.
    pub marked: Vec<Uuid>,
    pub notified: FanoutReport,
}

/// Applies inbound protocol operations to the store and fans the results out.
/// Persistence always happens before any frame is written.
#[derive(Debug, Clone)]
pub struct DeliveryService {
    store: Arc<dyn ConversationStore>,
    registry: Arc<ConnectionRegistry>,
}

impl DeliveryService {
    pub fn new(store: Arc<dyn ConversationStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Persists a message and fans it out.
    ///
    /// `origin` is the connection that issued the send; it receives no echo.
    ///
    /// # Errors
    /// `BadRequest` for an empty body or invalid target, `NotFound` for an
    /// unknown conversation, `AuthFailure` for non-members, `Store` when
    /// persistence fails (nothing is fanned out in that case).
    #[instrument(name = "delivery.send_message", skip(self, request), fields(sender_id = %sender), err(level = "debug"))]
    pub async fn send_message(
        &self,
        sender: Uuid,
        origin: Option<ConnectionId>,
        request: SendMessageRequest,
    ) -> Result<SendOutcome, ChatError> {
        // Validated before the conversation is resolved so a rejected first
        // message never leaves an empty conversation behind.
        let (content, media) = normalize_body(request.content, request.media)?;

        let (conversation, conversation_created) = match (request.conversation_id, request.counterparty_id) {
            (Some(conversation_id), _) => {
                let conversation = self
                    .store
                    .find_conversation(conversation_id)
                    .await?
                    .ok_or_else(|| {
                        ChatError::not_found(format!("conversation {conversation_id} does not exist"))
                    })?;
                if !conversation.is_member(sender) {
                    return Err(ChatError::auth(format!(
                        "not a member of conversation {conversation_id}"
                    )));
                }
                (conversation, false)
            }
            (None, Some(counterparty)) => self.open_direct(sender, counterparty).await?,
            (None, None) => {
                return Err(ChatError::bad_request(
                    "either conversationId or counterpartyId is required",
                ));
            }
        };

        let message = self
            .store
            .append_message(NewMessage {
                conversation_id: conversation.id,
                sender_id: sender,
                content,
                media,
            })
            .await?;
        counter!("marketchat_messages_persisted_total").increment(1);

        let event = MessageEvent {
            conversation_id: conversation.id,
            message: message.clone(),
        };

        let incoming = ServerFrame::GetMessage(event.clone());
        let mut recipients = FanoutReport::default();
        for member in conversation.other_members(sender) {
            recipients.merge(self.registry.send(member, &incoming).await);
        }

        let echo = ServerFrame::MessageSent(event);
        let echoes = match origin {
            Some(origin) => self.registry.send_except(sender, origin, &echo).await,
            None => self.registry.send(sender, &echo).await,
        };

        debug!(
            conversation_id = %conversation.id,
            message_id = %message.id,
            delivered = recipients.delivered,
            echoed = echoes.delivered,
            "message persisted and fanned out"
        );

        Ok(SendOutcome {
            conversation,
            conversation_created,
            message,
            recipients,
            echoes,
        })
    }

    /// Marks everything the viewer has not seen yet and notifies the other
    /// members. A repeated ack with nothing new is a silent no-op.
    ///
    /// # Errors
    /// `NotFound` for an unknown conversation, `AuthFailure` for non-members,
    /// `Store` when persistence fails.
    #[instrument(name = "delivery.acknowledge_seen", skip(self), err(level = "debug"))]
    pub async fn acknowledge_seen(
        &self,
        viewer: Uuid,
        conversation_id: Uuid,
    ) -> Result<SeenOutcome, ChatError> {
        let conversation = self
            .store
            .find_conversation(conversation_id)
            .await?
            .ok_or_else(|| ChatError::not_found(format!("conversation {conversation_id} does not exist")))?;

        if !conversation.is_member(viewer) {
            return Err(ChatError::auth(format!(
                "not a member of conversation {conversation_id}"
            )));
        }

        let marked = self.store.mark_seen(conversation_id, viewer).await?;
        let mut notified = FanoutReport::default();

        if !marked.is_empty() {
            counter!("marketchat_seen_acknowledgements_total").increment(1);
            let frame = ServerFrame::MessagesSeen(SeenEvent {
                conversation_id,
                seen_by: viewer,
                seen_at: Utc::now(),
            });
            for member in conversation.other_members(viewer) {
                notified.merge(self.registry.send(member, &frame).await);
            }
        }

        Ok(SeenOutcome {
            conversation_id,
            marked,
            notified,
        })
    }

    /// Finds or creates the direct conversation between two distinct users.
    ///
    /// # Errors
    /// `BadRequest` when both ids are the same user, `Store` on persistence failure.
    pub async fn open_direct(
        &self,
        user: Uuid,
        counterparty: Uuid,
    ) -> Result<(ConversationRecord, bool), ChatError> {
        if user == counterparty {
            return Err(ChatError::bad_request(
                "cannot open a conversation with yourself",
            ));
        }

        let (conversation, created) = self.store.find_or_create_direct(user, counterparty).await?;
        if created {
            counter!("marketchat_conversations_created_total").increment(1);
            info!(conversation_id = %conversation.id, "direct conversation opened");
        }
        Ok((conversation, created))
    }
}

/// Blank text counts as absent and blank media references are discarded.
fn normalize_body(
    content: Option<String>,
    media: Vec<String>,
) -> Result<(Option<String>, Vec<String>), ChatError> {
    let content = content.filter(|text| !text.trim().is_empty());
    let media: Vec<String> = media
        .into_iter()
        .filter(|reference| !reference.trim().is_empty())
        .collect();

    if content.is_none() && media.is_empty() {
        return Err(ChatError::bad_request(
            "a message needs text content or at least one media reference",
        ));
    }
    Ok((content, media))
}
