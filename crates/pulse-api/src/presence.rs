use axum::{
    Json,
    extract::{Path, State},
};

use pulse_types::api::PresenceSnapshot;

use crate::state::AppState;

/// Current viewers of a presence channel. Live updates arrive over the
/// gateway on `presence:{channel_key}`.
pub async fn get_presence(
    State(state): State<AppState>,
    Path(channel_key): Path<String>,
) -> Json<PresenceSnapshot> {
    let viewers = state.presence.snapshot(&channel_key);
    Json(PresenceSnapshot {
        count: viewers.len(),
        channel_key,
        viewers,
    })
}
