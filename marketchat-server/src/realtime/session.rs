use std::sync::Arc;

use shared::models::{ClientFrame, ServerFrame};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::ChatError,
    realtime::registry::{ConnectionHandle, Registration},
    services::delivery_service::DeliveryService,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registered(Uuid),
    Closed,
}

/// Protocol state of one physical connection:
/// `Unregistered -> Registered -> Closed`, with `Closed` terminal.
#[derive(Debug)]
pub struct ConnectionSession {
    delivery: Arc<DeliveryService>,
    connection: ConnectionHandle,
    /// Identity resolved when the socket was upgraded, if any.
    authenticated: Option<Uuid>,
    require_authenticated: bool,
    state: SessionState,
}

impl ConnectionSession {
    pub fn new(
        delivery: Arc<DeliveryService>,
        connection: ConnectionHandle,
        authenticated: Option<Uuid>,
        require_authenticated: bool,
    ) -> Self {
        Self {
            delivery,
            connection,
            authenticated,
            require_authenticated,
            state: SessionState::Unregistered,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Parses and applies one inbound text frame. Failures are reported to
    /// this connection only.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => {
                let event = frame.event();
                if let Err(err) = self.handle_frame(frame).await {
                    self.report(Some(event), &err);
                }
            }
            Err(err) => {
                let event = serde_json::from_str::<serde_json::Value>(text)
                    .ok()
                    .and_then(|value| value.get("event")?.as_str().map(str::to_owned));
                self.report(
                    event.as_deref(),
                    &ChatError::bad_request(format!("malformed frame: {err}")),
                );
            }
        }
    }

    /// # Errors
    /// Returns the [`ChatError`] the operation failed with.
    pub async fn handle_frame(&mut self, frame: ClientFrame) -> Result<(), ChatError> {
        match (self.state, frame) {
            (SessionState::Closed, frame) => {
                debug!(connection_id = %self.connection.id(), event = frame.event(), "frame after close ignored");
                Ok(())
            }
            (_, ClientFrame::Register(payload)) => self.register(payload.user_id()).await,
            (SessionState::Unregistered, _) => {
                Err(ChatError::auth("register before sending frames"))
            }
            (SessionState::Registered(user_id), ClientFrame::SendMessage(request)) => {
                self.delivery
                    .send_message(user_id, Some(self.connection.id()), request)
                    .await?;
                Ok(())
            }
            (SessionState::Registered(user_id), ClientFrame::MessageSeen(request)) => {
                self.delivery
                    .acknowledge_seen(user_id, request.conversation_id)
                    .await?;
                Ok(())
            }
        }
    }

    /// Writes an `error` frame to this connection and logs at a level that
    /// matches the failure.
    pub fn report(&self, event: Option<&str>, err: &ChatError) {
        let connection_id = self.connection.id();
        match err {
            ChatError::Store(source) => {
                error!(connection_id = %connection_id, event, error = %source, "store failure while handling frame");
            }
            ChatError::AuthFailure(_) => {
                debug!(connection_id = %connection_id, event, error = %err, "frame rejected");
            }
            ChatError::NotFound(_) | ChatError::BadRequest(_) => {
                debug!(connection_id = %connection_id, event, error = %err, "invalid frame");
            }
        }
        self.connection
            .try_deliver(ServerFrame::Error(err.to_frame(event)));
    }

    /// Terminal transition; unregisters the connection.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let SessionState::Registered(user_id) = self.state {
            self.delivery
                .registry()
                .unregister(self.connection.id())
                .await;
            info!(connection_id = %self.connection.id(), user_id = %user_id, "connection closed");
        }
        self.state = SessionState::Closed;
    }

    async fn register(&mut self, user_id: Uuid) -> Result<(), ChatError> {
        if self.require_authenticated && self.authenticated != Some(user_id) {
            return Err(ChatError::auth(
                "register identity does not match the authenticated user",
            ));
        }

        let registration = self
            .delivery
            .registry()
            .register(user_id, self.connection.clone())
            .await;

        match registration {
            Registration::New => {
                info!(connection_id = %self.connection.id(), user_id = %user_id, "connection registered");
            }
            Registration::Unchanged => {}
            Registration::Rebound { previous } => {
                warn!(
                    connection_id = %self.connection.id(),
                    previous_user_id = %previous,
                    user_id = %user_id,
                    "session switched identity"
                );
            }
        }

        self.state = SessionState::Registered(user_id);
        Ok(())
    }
}
