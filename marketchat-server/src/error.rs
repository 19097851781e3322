use shared::models::ErrorFrame;
use thiserror::Error;

use crate::store::StoreError;

/// Failures surfaced to a caller, over HTTP or as an `error` frame.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing or unregistered identity, or access by a non-member.
    #[error("{0}")]
    AuthFailure(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("conversation store failure: {0}")]
    Store(StoreError),
}

impl ChatError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthFailure(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AuthFailure(_) => "auth_failure",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Store(_) => "store_unavailable",
        }
    }

    /// Message safe to show to the caller. Store internals stay in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Store(_) => "the conversation store is temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }

    #[must_use]
    pub fn to_frame(&self, event: Option<&str>) -> ErrorFrame {
        let frame = ErrorFrame::new(self.code(), self.public_message());
        match event {
            Some(event) => frame.for_event(event),
            None => frame,
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConversationNotFound(id) => {
                Self::NotFound(format!("conversation {id} does not exist"))
            }
            StoreError::NotMember { conversation_id, .. } => {
                Self::AuthFailure(format!("not a member of conversation {conversation_id}"))
            }
            other => Self::Store(other),
        }
    }
}
