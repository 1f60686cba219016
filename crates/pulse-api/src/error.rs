use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use pulse_types::error::PulseError;

/// HTTP face of [`PulseError`].
#[derive(Debug)]
pub struct ApiError(pub PulseError);

impl From<PulseError> for ApiError {
    fn from(e: PulseError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PulseError::Validation(_) => StatusCode::BAD_REQUEST,
            PulseError::TransientDelivery(_) => StatusCode::SERVICE_UNAVAILABLE,
            PulseError::Conflict(_) => StatusCode::CONFLICT,
            PulseError::NotFound(_) => StatusCode::NOT_FOUND,
            PulseError::Forbidden(_) => StatusCode::FORBIDDEN,
            PulseError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            PulseError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the logs
        let message = match &self.0 {
            PulseError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        let body = Json(serde_json::json!({
            "error": message,
            "retryable": self.0.is_retryable(),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
