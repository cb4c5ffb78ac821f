use alyx_base::to_rfc3339;
use axum::{extract::{Path, State}, http::StatusCode, Json};
use serde_json::{json, Value as Json_};

use crate::{error::ApiResult, state::AppState};

/// `POST /transactions` -> `{tx_id, expires_at}` (§4.B, §6).
pub async fn begin(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Json_>)> {
    let (token, expires_at) = state.txn.begin().await?;
    Ok((StatusCode::CREATED, Json(json!({"tx_id": token, "expires_at": to_rfc3339(expires_at)}))))
}

/// `POST /transactions/{tx_id}/commit`.
pub async fn commit(State(state): State<AppState>, Path(tx_id): Path<String>) -> ApiResult<StatusCode> {
    state.txn.commit(&tx_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /transactions/{tx_id}/rollback`.
pub async fn rollback(State(state): State<AppState>, Path(tx_id): Path<String>) -> ApiResult<StatusCode> {
    state.txn.rollback(&tx_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
