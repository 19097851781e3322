/// Conversation services shared by the socket and HTTP surfaces
pub mod delivery_service;
pub mod previews;
pub mod query_service;

pub use delivery_service::{DeliveryService, SendOutcome, SeenOutcome};
pub use previews::{PreviewResolver, PreviewResolvers};
pub use query_service::QueryService;
