use std::sync::Arc;

use axum::{
    extract::{Extension, State, ws::WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::{
    app_state::AppState,
    http::error::ApiError,
    middleware::request_context::RequestContext,
    realtime::actor::{SocketSettings, run_connection},
};

/// Upgrades to the persistent delivery socket. The client must still send a
/// `register` frame before anything else.
pub async fn realtime_socket(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    ws: WebSocketUpgrade,
) -> Response {
    let settings = SocketSettings::from(&state.config.realtime);

    if settings.require_authenticated && context.user_id.is_none() {
        debug!(request_id = %context.request_id, "socket upgrade without identity rejected");
        return ApiError::unauthorized("an authenticated user identity is required")
            .into_response();
    }

    let delivery = Arc::clone(&state.delivery);
    let authenticated = context.user_id;
    ws.on_upgrade(move |socket| run_connection(socket, delivery, settings, authenticated))
}
