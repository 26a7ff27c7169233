use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::{
    app_state::AppState,
    handlers::{messages, realtime},
    middleware::auth::auth_middleware,
};

/// Messaging routes; every route requires an authenticated caller.
pub fn create_router_messages(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/messages", post(messages::send_message))
        .route("/messages/unread", get(messages::unread))
        .route("/messages/ws", get(realtime::messages_ws))
        .route("/messages/{user_id}", get(messages::fetch_thread))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
