use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use pulse_types::api::{CountResponse, SendMessageRequest};
use pulse_types::error::PulseError;
use pulse_types::message::{ConversationSummary, DeleteScope, DirectMessage, SendOptions};

use crate::dm;
use crate::error::ApiResult;
use crate::middleware::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub limit: Option<u32>,
    /// `seq` of the oldest message already loaded.
    pub before: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub scope: DeleteScope,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    Ok(Json(dm::list_conversations(&state, claims.sub).await?))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ConversationQuery>,
) -> ApiResult<Json<Vec<DirectMessage>>> {
    let messages = dm::list_conversation(&state, claims.sub, peer_id, query.limit, query.before).await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let options = SendOptions {
        is_one_time: req.is_one_time,
        reply_to_id: req.reply_to_id,
        client_nonce: req.client_nonce,
    };
    let message = dm::send(&state, claims.sub, peer_id, req.content, options).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<CountResponse>> {
    let count = dm::mark_conversation_read(&state, claims.sub, peer_id).await?;
    Ok(Json(CountResponse { count }))
}

/// Open a message. A repeat view of a one-time message is not an error for
/// the client: it gets the already-viewed placeholder.
pub async fn view_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<DirectMessage>> {
    match dm::view(&state, message_id, claims.sub).await {
        Ok(message) => Ok(Json(message)),
        Err(PulseError::Conflict(reason)) => {
            debug!("{} ({}): {}", claims.username, claims.sub, reason);
            Ok(Json(dm::get(&state, message_id, claims.sub).await?))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<StatusCode> {
    dm::delete(&state, message_id, claims.sub, query.scope).await?;
    Ok(StatusCode::NO_CONTENT)
}
