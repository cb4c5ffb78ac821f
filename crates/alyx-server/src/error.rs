use alyx_base::AlyxError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Wraps an `anyhow::Error` at the HTTP boundary, mapping the taxonomy in
/// `alyx_base::ErrorCode` (§7) to its HTTP status. Errors that never carried
/// an `AlyxError` in their `anyhow` chain (a `rusqlite` error that slipped
/// through unclassified, a panic recovered by a handler, ...) fall back to
/// `INTERNAL`/500 rather than leaking the underlying error type.
pub struct ApiError(anyhow::Error);

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let alyx = AlyxError::downcast_chain(&self.0).cloned().unwrap_or_else(|| AlyxError::internal(self.0.to_string()));
        let status = StatusCode::from_u16(alyx.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "unhandled request error");
        }
        (status, Json(alyx.to_wire())).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
