use std::sync::Arc;

use axum::{Router, routing::get};

use crate::{app_state::AppState, handlers::realtime::realtime_socket};

pub fn create_router_realtime() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(realtime_socket))
}
