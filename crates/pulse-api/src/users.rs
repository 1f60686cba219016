use axum::{Extension, extract::State, http::StatusCode};
use tracing::info;

use crate::error::ApiResult;
use crate::middleware::Claims;
use crate::state::AppState;

/// Upsert the caller's directory row from their token. Broadcasts reach
/// every user that has synced at least once.
pub async fn sync_me(State(state): State<AppState>, Extension(claims): Extension<Claims>) -> ApiResult<StatusCode> {
    let id = claims.sub.to_string();
    let username = claims.username.clone();
    let avatar_url = claims.avatar_url.clone();
    state
        .store(move |db| db.upsert_user(&id, &username, avatar_url.as_deref()))
        .await?;

    info!("Synced directory entry for {} ({})", claims.username, claims.sub);
    Ok(StatusCode::NO_CONTENT)
}
