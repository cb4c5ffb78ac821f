use std::sync::Arc;

use alyx_base::AlyxError;
use alyx_storage::{query::SortClause, Filter, QueryOptions};
use alyx_txn::SessionHandle;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value as Json_;

use crate::{error::ApiResult, state::AppState};

/// Query-string shape for `GET /api/collections/{name}` (§4.A, §6): `filter`
/// is a JSON-encoded `Filter` (the conjunction-of-clauses shape from §3) so
/// the wire format matches exactly what the Realtime Hub's `subscribe`
/// payload and this REST endpoint both accept; `sort` is the comma-
/// separated `+field`/`-field` convention.
#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub tx_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TxParam {
    pub tx_id: Option<String>,
}

fn parse_query_options(params: &ListParams) -> ApiResult<QueryOptions> {
    let filter = match &params.filter {
        Some(raw) => serde_json::from_str::<Filter>(raw)
            .map_err(|err| AlyxError::validation(format!("invalid filter: {err}")))?,
        None => Filter::default(),
    };
    let sort = match &params.sort {
        Some(raw) => raw
            .split(',')
            .filter(|s| !s.is_empty())
            .map(SortClause::parse)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|err| AlyxError::validation(err.to_string()))?,
        None => Vec::new(),
    };
    Ok(QueryOptions { filter, sort, limit: params.limit, offset: params.offset })
}

/// Resolves an optional `tx_id` into a session handle. A present-but-
/// unresolvable token is rejected with `INVALID_TRANSACTION` rather than
/// silently falling back to an ungated write, per §4.B's middleware
/// contract.
fn resolve_tx(state: &AppState, tx_id: &Option<String>) -> ApiResult<Option<Arc<SessionHandle>>> {
    match tx_id {
        None => Ok(None),
        Some(token) => match state.txn.resolve(token) {
            Some(handle) => Ok(Some(handle)),
            None => Err(AlyxError::invalid_transaction(format!("no active transaction for tx_id {token}")).into()),
        },
    }
}

pub async fn list(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Json_>> {
    let opts = parse_query_options(&params)?;
    let tx = resolve_tx(&state, &params.tx_id)?;
    let page = match &tx {
        Some(tx) => tx.query(&collection, &opts).await?,
        None => state.gateway.query(&collection, &opts).await?,
    };
    let total = match &tx {
        Some(tx) => tx.count(&collection, &opts.filter).await?,
        None => state.gateway.count(&collection, &opts.filter).await?,
    };
    Ok(Json(serde_json::json!({"docs": page.docs, "total": total})))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Query(params): Query<TxParam>,
) -> ApiResult<Json<Json_>> {
    let tx = resolve_tx(&state, &params.tx_id)?;
    let doc = match &tx {
        Some(tx) => tx.find_one(&collection, &id).await?,
        None => state.gateway.find_one(&collection, &id).await?,
    };
    match doc {
        Some(doc) => Ok(Json(doc)),
        None => Err(AlyxError::not_found(format!("no document `{id}` in `{collection}`")).into()),
    }
}

pub async fn create(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<TxParam>,
    Json(body): Json<Json_>,
) -> ApiResult<(StatusCode, Json<Json_>)> {
    let tx = resolve_tx(&state, &params.tx_id)?;
    let created = match &tx {
        Some(tx) => tx.create(&collection, body).await?,
        None => state.gateway.create(&collection, body).await?,
    };
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Query(params): Query<TxParam>,
    Json(patch): Json<Json_>,
) -> ApiResult<Json<Json_>> {
    let tx = resolve_tx(&state, &params.tx_id)?;
    let updated = match &tx {
        Some(tx) => tx.update(&collection, &id, patch).await?,
        None => state.gateway.update(&collection, &id, patch).await?,
    };
    match updated {
        Some(doc) => Ok(Json(doc)),
        None => Err(AlyxError::not_found(format!("no document `{id}` in `{collection}`")).into()),
    }
}

pub async fn delete(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Query(params): Query<TxParam>,
) -> ApiResult<StatusCode> {
    let tx = resolve_tx(&state, &params.tx_id)?;
    let deleted = match &tx {
        Some(tx) => tx.delete(&collection, &id).await?,
        None => state.gateway.delete(&collection, &id).await?,
    };
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AlyxError::not_found(format!("no document `{id}` in `{collection}`")).into())
    }
}
