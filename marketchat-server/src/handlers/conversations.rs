use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    http::{
        error::{ApiError, AppResult},
        extract::{ApiJson, ApiPath, ApiQuery},
        problem::ProblemDetails,
    },
    middleware::request_context::RequestContext,
};
use shared::models::{
    ConversationPreview, CreateConversationRequest, MessagePage, MessagePageQuery, SeenReceipt,
};

/// List the caller's conversations, most recently active first.
#[utoipa::path(
    get,
    path = "/api/conversations",
    responses(
        (status = 200, description = "Conversation previews", body = [ConversationPreview]),
        (status = 401, description = "No identity", body = ProblemDetails),
        (status = 503, description = "Store unavailable", body = ProblemDetails)
    ),
    tag = "Conversations"
)]
#[instrument(skip(state, context))]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<Vec<ConversationPreview>>> {
    let user_id = require_user(&context)?;
    let previews = state.queries.list_conversations(user_id).await?;
    Ok(Json(previews))
}

/// Conversations whose latest message the caller has not seen.
#[utoipa::path(
    get,
    path = "/api/conversations/unseen",
    responses(
        (status = 200, description = "Conversations with unseen activity", body = [ConversationPreview]),
        (status = 401, description = "No identity", body = ProblemDetails),
        (status = 503, description = "Store unavailable", body = ProblemDetails)
    ),
    tag = "Conversations"
)]
#[instrument(skip(state, context))]
pub async fn unseen_conversations(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<Vec<ConversationPreview>>> {
    let user_id = require_user(&context)?;
    let previews = state.queries.unseen_conversations(user_id).await?;
    Ok(Json(previews))
}

/// Open the direct conversation with another user, reusing an existing one.
#[utoipa::path(
    post,
    path = "/api/conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = ConversationPreview),
        (status = 200, description = "Existing conversation", body = ConversationPreview),
        (status = 400, description = "Invalid counterparty", body = ProblemDetails),
        (status = 401, description = "No identity", body = ProblemDetails)
    ),
    tag = "Conversations"
)]
#[instrument(skip(state, context, payload))]
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    ApiJson(payload): ApiJson<CreateConversationRequest>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user(&context)?;
    let (conversation, created) = state
        .delivery
        .open_direct(user_id, payload.counterparty_id)
        .await?;
    let preview = state
        .queries
        .get_conversation(user_id, conversation.id)
        .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(preview)))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}",
    params(("conversation_id" = Uuid, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Conversation preview", body = ConversationPreview),
        (status = 403, description = "Not a member", body = ProblemDetails),
        (status = 404, description = "Unknown conversation", body = ProblemDetails)
    ),
    tag = "Conversations"
)]
#[instrument(skip(state, context))]
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    ApiPath(conversation_id): ApiPath<Uuid>,
) -> AppResult<Json<ConversationPreview>> {
    let user_id = require_user(&context)?;
    let preview = state
        .queries
        .get_conversation(user_id, conversation_id)
        .await?;
    Ok(Json(preview))
}

/// Page backwards through a conversation's history.
#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}/messages",
    params(
        ("conversation_id" = Uuid, Path, description = "Conversation id"),
        MessagePageQuery
    ),
    responses(
        (status = 200, description = "Messages oldest first", body = MessagePage),
        (status = 400, description = "Malformed cursor or limit", body = ProblemDetails),
        (status = 403, description = "Not a member", body = ProblemDetails),
        (status = 404, description = "Unknown conversation", body = ProblemDetails)
    ),
    tag = "Conversations"
)]
#[instrument(skip(state, context))]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    ApiPath(conversation_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<MessagePageQuery>,
) -> AppResult<Json<MessagePage>> {
    let user_id = require_user(&context)?;
    let page = state
        .queries
        .paginate_messages(user_id, conversation_id, query)
        .await?;
    Ok(Json(page))
}

/// Mark the conversation as seen by the caller and notify the other members.
#[utoipa::path(
    post,
    path = "/api/conversations/{conversation_id}/seen",
    params(("conversation_id" = Uuid, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Seen state updated", body = SeenReceipt),
        (status = 403, description = "Not a member", body = ProblemDetails),
        (status = 404, description = "Unknown conversation", body = ProblemDetails)
    ),
    tag = "Conversations"
)]
#[instrument(skip(state, context))]
pub async fn mark_seen(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    ApiPath(conversation_id): ApiPath<Uuid>,
) -> AppResult<Json<SeenReceipt>> {
    let user_id = require_user(&context)?;
    let outcome = state
        .delivery
        .acknowledge_seen(user_id, conversation_id)
        .await?;
    Ok(Json(SeenReceipt {
        conversation_id,
        marked: outcome.marked.len(),
    }))
}

pub(crate) fn require_user(context: &RequestContext) -> Result<Uuid, ApiError> {
    context
        .user_id
        .ok_or_else(|| ApiError::unauthorized("an authenticated user identity is required"))
}
