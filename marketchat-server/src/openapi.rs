#![allow(clippy::needless_for_each)] // Derive macro emits a for_each internally

use shared::models::{
    ConversationKind, ConversationPreview, CreateConversationRequest, ErrorFrame, Message,
    MessagePage, SeenReceipt,
};
use utoipa::OpenApi;

use crate::http::problem::ProblemDetails;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Marketchat API",
        version = "1.0.0",
        description = "Buyer/seller conversations: inbox listings, history and seen state. \
                       Real-time delivery runs over the `/api/ws` socket."
    ),
    paths(
        crate::handlers::conversations::list_conversations,
        crate::handlers::conversations::unseen_conversations,
        crate::handlers::conversations::create_conversation,
        crate::handlers::conversations::get_conversation,
        crate::handlers::conversations::list_messages,
        crate::handlers::conversations::mark_seen,
    ),
    components(
        schemas(
            ConversationKind,
            ConversationPreview,
            CreateConversationRequest,
            ErrorFrame,
            Message,
            MessagePage,
            ProblemDetails,
            SeenReceipt,
        )
    ),
    tags(
        (name = "Conversations", description = "Conversation listings and history")
    )
)]
pub struct ApiDoc;
