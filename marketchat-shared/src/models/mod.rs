pub mod conversation;
pub mod errors;
pub mod frames;
pub mod message;

pub use conversation::{
    ConversationKind, ConversationPreview, CreateConversationRequest, SeenReceipt,
};
pub use errors::ErrorFrame;
pub use frames::{ClientFrame, MessageEvent, RegisterPayload, SeenEvent, ServerFrame};
pub use message::{
    Message, MessagePage, MessagePageQuery, MessageSeenRequest, SendMessageRequest,
};
