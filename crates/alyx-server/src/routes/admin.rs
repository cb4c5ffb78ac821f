use alyx_base::{now, AlyxError};
use alyx_hooks::Hook;
use alyx_reqlog::RequestLogQuery;
use alyx_schedule::{Schedule, ScheduleExecConfig, ScheduleKind};
use axum::{extract::{Query, State}, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value as Json_};

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize, Default)]
pub struct RequestLogParams {
    pub method: Option<String>,
    pub path: Option<String>,
    pub exclude_prefix: Option<String>,
    pub status: Option<u16>,
    pub min_status: Option<u16>,
    pub max_status: Option<u16>,
    pub actor_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// `GET /admin/requests` (§4.I): filtered, paginated, newest-first query
/// over the in-memory request log ring.
pub async fn requests(State(state): State<AppState>, Query(params): Query<RequestLogParams>) -> Json<Json_> {
    let query = RequestLogQuery {
        method: params.method,
        path: params.path,
        exclude_prefix: params.exclude_prefix,
        status: params.status,
        min_status: params.min_status,
        max_status: params.max_status,
        actor_id: params.actor_id,
        since: params.since,
        until: params.until,
        limit: params.limit,
        offset: params.offset,
    };
    let entries = state.request_log.query(&query);
    Json(json!({"entries": entries}))
}

/// `GET /admin/config` (§4.J): the effective, validated configuration.
pub async fn config(State(state): State<AppState>) -> Json_ {
    serde_json::to_value(state.config.as_ref()).unwrap_or(Json_::Null)
}

/// `GET /admin/hooks` (§3 Subscription, §4.F): currently declared hooks.
pub async fn list_hooks(State(state): State<AppState>) -> Json<Json_> {
    Json(json!({"hooks": state.hooks.all().iter().map(|h| h.as_ref()).collect::<Vec<_>>()}))
}

/// `POST /admin/hooks`: declares one additional hook at runtime (§3
/// Subscription: "declared at startup or via admin API"). Appends to the
/// existing declaration set rather than replacing it, rejecting a
/// duplicate id to preserve "immutable per-id".
pub async fn install_hook(State(state): State<AppState>, Json(hook): Json<Hook>) -> ApiResult<StatusCode> {
    let mut hooks: Vec<Hook> = state.hooks.all().iter().map(|h| h.as_ref().clone()).collect();
    if hooks.iter().any(|h| h.id == hook.id) {
        return Err(AlyxError::validation(format!("hook id `{}` already declared", hook.id)).into());
    }
    hooks.push(hook);
    state.hooks.install(hooks);
    Ok(StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub id: String,
    pub kind: String,
    pub expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub skip_if_running: bool,
    #[serde(default)]
    pub max_overlap: u32,
    #[serde(default)]
    pub retry_on_failure: bool,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub input: Json_,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// `POST /admin/schedules` (§3 Schedule, §4.D).
pub async fn register_schedule(
    State(state): State<AppState>,
    Json(request): Json<ScheduleRequest>,
) -> ApiResult<StatusCode> {
    let kind = ScheduleKind::from_parts(&request.kind, &request.expression)
        .map_err(|err| AlyxError::validation(err.to_string()))?;
    let schedule = Schedule {
        id: request.id,
        kind,
        next_run: now(),
        last_run: None,
        timezone: request.timezone,
        execution_count: 0,
        config: ScheduleExecConfig {
            skip_if_running: request.skip_if_running,
            max_overlap: request.max_overlap,
            retry_on_failure: request.retry_on_failure,
            max_retries: request.max_retries,
            input: request.input,
        },
    };
    state.schedules.register(schedule).await?;
    Ok(StatusCode::CREATED)
}

/// `DELETE /admin/schedules/{id}`.
pub async fn remove_schedule(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> ApiResult<StatusCode> {
    state.schedules.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
