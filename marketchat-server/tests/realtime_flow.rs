//! End-to-end delivery behaviour over channel-backed connections.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use server::{
    realtime::{ConnectionHandle, ConnectionRegistry, ConnectionSession, SessionState},
    services::{DeliveryService, PreviewResolvers, QueryService},
    store::{
        ConversationRecord, ConversationStore, ConversationSummary, InMemoryConversationStore,
        InMemoryProfileDirectory, NewMessage, StoreError, UserProfile,
    },
};
use shared::{
    config::server::PaginationConfig,
    models::{Message, MessagePageQuery, SendMessageRequest, ServerFrame},
};
use tokio::sync::mpsc;
use uuid::Uuid;

struct Harness {
    store: Arc<dyn ConversationStore>,
    registry: Arc<ConnectionRegistry>,
    delivery: Arc<DeliveryService>,
    queries: QueryService,
    profiles: Arc<InMemoryProfileDirectory>,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(InMemoryConversationStore::new()))
    }

    fn with_store(store: Arc<dyn ConversationStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = Arc::new(DeliveryService::new(
            Arc::clone(&store),
            Arc::clone(&registry),
        ));
        let profiles = Arc::new(InMemoryProfileDirectory::new());
        let queries = QueryService::new(
            Arc::clone(&store),
            PreviewResolvers::with_profiles(profiles.clone()),
            PaginationConfig::default(),
        );
        Self {
            store,
            registry,
            delivery,
            queries,
            profiles,
        }
    }

    /// Opens a connection and registers it as `user_id`.
    async fn connect(&self, user_id: Uuid) -> Client {
        let (handle, frames) = ConnectionHandle::channel(16);
        let mut session =
            ConnectionSession::new(Arc::clone(&self.delivery), handle, Some(user_id), true);
        session
            .handle_text(&format!(r#"{{"event":"register","data":"{user_id}"}}"#))
            .await;
        assert_eq!(session.state(), SessionState::Registered(user_id));
        Client { session, frames }
    }
}

struct Client {
    session: ConnectionSession,
    frames: mpsc::Receiver<ServerFrame>,
}

impl Client {
    async fn send_json(&mut self, json: serde_json::Value) {
        self.session.handle_text(&json.to_string()).await;
    }

    fn drain(&mut self) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

fn send_to(counterparty: Uuid, content: &str) -> serde_json::Value {
    serde_json::json!({
        "event": "sendMessage",
        "data": { "counterpartyId": counterparty, "content": content }
    })
}

#[tokio::test]
async fn multi_device_fan_out_reaches_each_other_connection_once() {
    let harness = Harness::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_phone = harness.connect(alice).await;
    let mut alice_laptop = harness.connect(alice).await;
    let mut bob_phone = harness.connect(bob).await;

    alice_phone.send_json(send_to(bob, "is the bike still for sale?")).await;

    assert!(alice_phone.drain().is_empty());

    let bob_frames = bob_phone.drain();
    assert_eq!(bob_frames.len(), 1);
    let ServerFrame::GetMessage(incoming) = &bob_frames[0] else {
        panic!("expected getMessage, got {:?}", bob_frames[0]);
    };
    assert_eq!(incoming.message.sender_id, alice);
    assert_eq!(
        incoming.message.content.as_deref(),
        Some("is the bike still for sale?")
    );
    assert_eq!(incoming.conversation_id, incoming.message.conversation_id);

    let laptop_frames = alice_laptop.drain();
    assert_eq!(laptop_frames.len(), 1);
    let ServerFrame::MessageSent(echo) = &laptop_frames[0] else {
        panic!("expected messageSent, got {:?}", laptop_frames[0]);
    };
    assert_eq!(echo.message.id, incoming.message.id);
}

#[tokio::test]
async fn seen_acknowledgement_is_idempotent() {
    let harness = Harness::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_conn = harness.connect(alice).await;
    let mut bob_conn = harness.connect(bob).await;

    alice_conn.send_json(send_to(bob, "offer: 40")).await;
    let ServerFrame::GetMessage(incoming) = bob_conn.drain().remove(0) else {
        panic!("expected getMessage");
    };
    let seen = serde_json::json!({
        "event": "messageSeen",
        "data": { "conversationId": incoming.conversation_id }
    });

    bob_conn.send_json(seen.clone()).await;
    let alice_frames = alice_conn.drain();
    assert_eq!(alice_frames.len(), 1);
    let ServerFrame::MessagesSeen(event) = &alice_frames[0] else {
        panic!("expected messagesSeen, got {:?}", alice_frames[0]);
    };
    assert_eq!(event.seen_by, bob);
    assert_eq!(event.conversation_id, incoming.conversation_id);
    assert!(bob_conn.drain().is_empty());

    let before = harness
        .store
        .messages_before(incoming.conversation_id, None, 10)
        .await
        .unwrap();

    bob_conn.send_json(seen).await;
    assert!(alice_conn.drain().is_empty());
    assert!(bob_conn.drain().is_empty());

    let after = harness
        .store
        .messages_before(incoming.conversation_id, None, 10)
        .await
        .unwrap();
    assert_eq!(before, after);
    assert!(after[0].seen_by.contains(&bob));
}

#[tokio::test]
async fn offline_recipient_gets_persisted_message_without_attempts() {
    let harness = Harness::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let outcome = harness
        .delivery
        .send_message(
            alice,
            None,
            SendMessageRequest {
                counterparty_id: Some(bob),
                content: Some("ping".into()),
                ..SendMessageRequest::default()
            },
        )
        .await
        .unwrap();

    assert!(outcome.conversation_created);
    assert_eq!(outcome.recipients.attempted(), 0);
    assert_eq!(outcome.echoes.attempted(), 0);

    let page = harness
        .queries
        .paginate_messages(bob, outcome.conversation.id, MessagePageQuery::default())
        .await
        .unwrap();
    assert_eq!(page.messages, vec![outcome.message]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_to_one_conversation_keep_a_single_order() {
    let harness = Harness::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let delivery = Arc::clone(&harness.delivery);
            let (sender, counterparty) = if i % 2 == 0 { (alice, bob) } else { (bob, alice) };
            tokio::spawn(async move {
                delivery
                    .send_message(
                        sender,
                        None,
                        SendMessageRequest {
                            counterparty_id: Some(counterparty),
                            content: Some(format!("counteroffer {i}")),
                            ..SendMessageRequest::default()
                        },
                    )
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut conversations = HashSet::new();
    for task in tasks {
        conversations.insert(task.await.unwrap().conversation.id);
    }
    assert_eq!(conversations.len(), 1);
    let conversation_id = conversations.into_iter().next().unwrap();

    let page = harness
        .queries
        .paginate_messages(
            alice,
            conversation_id,
            MessagePageQuery {
                before: None,
                limit: Some(50),
            },
        )
        .await
        .unwrap();
    assert_eq!(page.messages.len(), 40);
    assert!(!page.has_more);
    assert!(
        page.messages
            .windows(2)
            .all(|pair| pair[0].created_at < pair[1].created_at)
    );
}

#[tokio::test]
async fn empty_message_is_rejected_and_nothing_is_persisted() {
    let harness = Harness::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_conn = harness.connect(alice).await;
    let mut bob_conn = harness.connect(bob).await;

    alice_conn
        .send_json(serde_json::json!({
            "event": "sendMessage",
            "data": { "counterpartyId": bob, "content": "", "media": [] }
        }))
        .await;

    let frames = alice_conn.drain();
    assert_eq!(frames.len(), 1);
    let ServerFrame::Error(error) = &frames[0] else {
        panic!("expected error frame, got {:?}", frames[0]);
    };
    assert_eq!(error.code, "bad_request");
    assert_eq!(error.event.as_deref(), Some("sendMessage"));

    assert!(bob_conn.drain().is_empty());
    assert!(harness.store.list_for_member(alice).await.unwrap().is_empty());
}

#[tokio::test]
async fn outsider_cannot_post_into_a_conversation() {
    let harness = Harness::new();
    let (alice, bob, mallory) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (conversation, _) = harness
        .delivery
        .open_direct(alice, bob)
        .await
        .unwrap();
    let mut bob_conn = harness.connect(bob).await;
    let mut mallory_conn = harness.connect(mallory).await;

    mallory_conn
        .send_json(serde_json::json!({
            "event": "sendMessage",
            "data": { "conversationId": conversation.id, "content": "hello" }
        }))
        .await;

    let frames = mallory_conn.drain();
    assert!(matches!(&frames[..], [ServerFrame::Error(e)] if e.code == "auth_failure"));
    assert!(bob_conn.drain().is_empty());
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let harness = Harness::new();
    let mut conn = harness.connect(Uuid::new_v4()).await;

    conn.send_json(serde_json::json!({
        "event": "messageSeen",
        "data": { "conversationId": Uuid::new_v4() }
    }))
    .await;

    let frames = conn.drain();
    assert!(matches!(&frames[..], [ServerFrame::Error(e)] if e.code == "not_found"));
}

#[tokio::test]
async fn disconnect_unregisters_only_that_connection() {
    let harness = Harness::new();
    let alice = Uuid::new_v4();
    let mut first = harness.connect(alice).await;
    let mut second = harness.connect(alice).await;

    first.session.close().await;
    assert_eq!(first.session.state(), SessionState::Closed);
    assert_eq!(harness.registry.connection_count(alice).await, 1);
    assert!(harness.registry.is_online(alice).await);

    second.session.close().await;
    assert_eq!(harness.registry.connection_count(alice).await, 0);
    assert!(!harness.registry.is_online(alice).await);
}

/// Delegates reads, fails every write.
#[derive(Debug)]
struct ReadOnlyStore {
    inner: InMemoryConversationStore,
}

#[async_trait]
impl ConversationStore for ReadOnlyStore {
    async fn find_or_create_direct(
        &self,
        first: Uuid,
        second: Uuid,
    ) -> Result<(ConversationRecord, bool), StoreError> {
        self.inner.find_or_create_direct(first, second).await
    }

    async fn find_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        self.inner.find_conversation(conversation_id).await
    }

    async fn append_message(&self, _: NewMessage) -> Result<Message, StoreError> {
        Err(StoreError::Unavailable("primary is read-only".into()))
    }

    async fn mark_seen(&self, _: Uuid, _: Uuid) -> Result<Vec<Uuid>, StoreError> {
        Err(StoreError::Unavailable("primary is read-only".into()))
    }

    async fn list_for_member(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>, StoreError> {
        self.inner.list_for_member(user_id).await
    }

    async fn messages_before(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.inner
            .messages_before(conversation_id, before, limit)
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn store_failure_is_reported_to_sender_and_not_fanned_out() {
    let harness = Harness::with_store(Arc::new(ReadOnlyStore {
        inner: InMemoryConversationStore::new(),
    }));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_phone = harness.connect(alice).await;
    let mut alice_laptop = harness.connect(alice).await;
    let mut bob_conn = harness.connect(bob).await;

    alice_phone.send_json(send_to(bob, "will this arrive?")).await;

    let frames = alice_phone.drain();
    assert_eq!(frames.len(), 1);
    let ServerFrame::Error(error) = &frames[0] else {
        panic!("expected error frame, got {:?}", frames[0]);
    };
    assert_eq!(error.code, "store_unavailable");
    assert!(!error.message.contains("read-only"));

    assert!(alice_laptop.drain().is_empty());
    assert!(bob_conn.drain().is_empty());
}

#[tokio::test]
async fn pagination_walks_the_whole_log_in_order() {
    let harness = Harness::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let mut sent = Vec::new();
    for i in 0..45 {
        let (sender, counterparty) = if i % 3 == 0 { (bob, alice) } else { (alice, bob) };
        let outcome = harness
            .delivery
            .send_message(
                sender,
                None,
                SendMessageRequest {
                    counterparty_id: Some(counterparty),
                    content: Some(format!("message {i}")),
                    ..SendMessageRequest::default()
                },
            )
            .await
            .unwrap();
        sent.push(outcome.message);
    }
    let conversation_id = sent[0].conversation_id;
    assert!(sent.iter().all(|m| m.conversation_id == conversation_id));

    let mut collected: Vec<Message> = Vec::new();
    let mut cursor = None;
    let mut pages = 0;
    loop {
        let page = harness
            .queries
            .paginate_messages(
                alice,
                conversation_id,
                MessagePageQuery {
                    before: cursor,
                    limit: Some(7),
                },
            )
            .await
            .unwrap();
        pages += 1;

        assert!(
            page.messages
                .windows(2)
                .all(|pair| pair[0].created_at < pair[1].created_at)
        );
        let mut batch = page.messages;
        batch.extend(collected);
        collected = batch;

        if !page.has_more {
            break;
        }
        cursor = page.next_cursor;
    }

    assert_eq!(pages, 7);
    let ids: Vec<Uuid> = collected.iter().map(|m| m.id).collect();
    let unique: HashSet<Uuid> = ids.iter().copied().collect();
    assert_eq!(unique.len(), 45);
    assert_eq!(ids, sent.iter().map(|m| m.id).collect::<Vec<_>>());
}

#[tokio::test]
async fn first_contact_shows_up_in_recipient_inbox_and_unseen_set() {
    let harness = Harness::new();
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
    harness
        .profiles
        .upsert(UserProfile {
            user_id: u1,
            display_name: "Corner Bookshop".into(),
            avatar_url: None,
        })
        .await;
    let mut u1_conn = harness.connect(u1).await;

    u1_conn.send_json(send_to(u2, "hi")).await;
    assert!(u1_conn.drain().is_empty());

    let inbox = harness.queries.list_conversations(u2).await.unwrap();
    assert_eq!(inbox.len(), 1);
    let preview = &inbox[0];
    assert_eq!(preview.members, vec![u1, u2]);
    assert_eq!(preview.title, "Corner Bookshop");
    assert_eq!(
        preview
            .last_message
            .as_ref()
            .and_then(|m| m.content.as_deref()),
        Some("hi")
    );
    assert!(preview.unseen);

    let unseen = harness.queries.unseen_conversations(u2).await.unwrap();
    assert_eq!(unseen.len(), 1);
    assert_eq!(unseen[0].id, preview.id);

    assert!(harness.queries.unseen_conversations(u1).await.unwrap().is_empty());

    harness
        .delivery
        .acknowledge_seen(u2, preview.id)
        .await
        .unwrap();
    assert!(harness.queries.unseen_conversations(u2).await.unwrap().is_empty());
}
