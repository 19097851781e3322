use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::{app_state::AppState, handlers::conversations};

/// Conversation REST surface, nested under `/api`.
pub fn create_router_conversations() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/conversations/unseen",
            get(conversations::unseen_conversations),
        )
        .route(
            "/conversations/{conversation_id}",
            get(conversations::get_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::list_messages),
        )
        .route(
            "/conversations/{conversation_id}/seen",
            post(conversations::mark_seen),
        )
}
