pub mod convert;
pub mod direct_messages;
pub mod dm;
pub mod error;
pub mod middleware;
pub mod notifications;
pub mod notify;
pub mod presence;
pub mod state;
pub mod store;
pub mod users;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};

use crate::middleware::require_auth;
use crate::state::AppState;

/// Every REST route. All of them need a bearer token.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/notifications",
            get(notifications::list_notifications)
                .post(notifications::create_notification)
                .delete(notifications::clear_notifications),
        )
        .route("/notifications/unread_count", get(notifications::unread_count))
        .route("/notifications/read_all", post(notifications::mark_all_read))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .route("/notifications/{id}", delete(notifications::delete_notification))
        .route("/broadcast", post(notifications::broadcast))
        .route("/users/me", post(users::sync_me))
        .route("/dm", get(direct_messages::list_conversations))
        .route("/dm/messages/{id}/view", post(direct_messages::view_message))
        .route("/dm/messages/{id}", delete(direct_messages::delete_message))
        .route(
            "/dm/{peer_id}",
            get(direct_messages::get_conversation).post(direct_messages::send_message),
        )
        .route("/dm/{peer_id}/read", post(direct_messages::mark_read))
        .route("/presence/{channel_key}", get(presence::get_presence))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
