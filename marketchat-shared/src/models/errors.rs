use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Failure report delivered to the connection that issued a frame.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
pub struct ErrorFrame {
    /// Stable machine-readable code such as `bad_request`.
    pub code: String,
    /// Human-readable explanation.
    pub message: String,
    /// Event name of the inbound frame that failed, when it could be parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

impl ErrorFrame {
    /// Creates an error frame that is not tied to a specific inbound event.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            event: None,
        }
    }

    /// Attaches the name of the inbound event that failed.
    #[must_use]
    pub fn for_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }
}

impl std::fmt::Display for ErrorFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.event {
            Some(event) => write!(f, "{} ({event}): {}", self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}
