use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use pulse_types::api::{BroadcastRequest, CountResponse, NotificationsPage, NotifyRequest};
use pulse_types::error::PulseError;
use pulse_types::grouping::{self, FeedEntry};
use pulse_types::notification::{NotificationCategory, NotificationType};

use crate::error::{ApiError, ApiResult};
use crate::middleware::Claims;
use crate::state::AppState;
use crate::{notify, store};

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<u32>,
    /// `seq` of the oldest item from the previous page.
    pub before: Option<i64>,
    pub category: Option<NotificationCategory>,
    #[serde(default)]
    pub grouped: bool,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<FeedQuery>,
) -> ApiResult<Json<NotificationsPage>> {
    let events = store::list(&state, claims.sub, query.limit, query.before).await?;
    // Cursor follows the raw window so filtering never skips rows
    let next_cursor = if events.len() as u32 == store::clamp_limit(query.limit) {
        events.last().map(|e| e.seq)
    } else {
        None
    };

    let events = match query.category {
        Some(category) => grouping::filter_by_category(&events, category),
        None => events,
    };
    let items = if query.grouped {
        grouping::group(&events)
    } else {
        events.into_iter().map(FeedEntry::Single).collect()
    };

    Ok(Json(NotificationsPage { items, next_cursor }))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<CountResponse>> {
    let count = store::unread_count(&state, claims.sub).await?;
    Ok(Json(CountResponse { count }))
}

pub async fn create_notification(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<NotifyRequest>,
) -> ApiResult<impl IntoResponse> {
    let kind = req.kind.notification_type();
    if !claims.admin && !kind.is_user_action() && kind != NotificationType::Unknown {
        return Err(ApiError(PulseError::Forbidden(format!(
            "'{}' notifications are issued by the platform",
            kind
        ))));
    }
    let event = notify::notify(&state, Some(&claims), req.recipient_id, req.kind, req.content).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    store::mark_read(&state, id, claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<CountResponse>> {
    let count = store::mark_all_read(&state, claims.sub).await?;
    Ok(Json(CountResponse { count }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    store::delete(&state, id, claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<CountResponse>> {
    let count = store::clear_all(&state, claims.sub).await?;
    Ok(Json(CountResponse { count }))
}

/// Admin-only announcement to every user in the directory.
pub async fn broadcast(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<BroadcastRequest>,
) -> ApiResult<impl IntoResponse> {
    if !claims.admin {
        return Err(ApiError(PulseError::Forbidden("broadcast requires admin".into())));
    }
    let result = notify::broadcast(&state, req.message, req.image_url, req.video_url).await?;
    Ok(Json(result))
}
