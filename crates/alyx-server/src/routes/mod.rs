pub mod admin;
pub mod collections;
pub mod functions;
pub mod metrics;
pub mod realtime;
pub mod transactions;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, decompression::RequestDecompressionLayer};

use crate::{middleware::observe, state::AppState};

/// Assembles the full HTTP surface (§6) over a constructed `AppState`.
/// Route paths mirror spec section `[ADDED]`s verbatim; CORS and request
/// decompression are the teacher's `local_backend` stack, carried over
/// unchanged since nothing about this spec's surface needs a different
/// cross-origin or body-encoding policy.
pub fn build(state: AppState) -> Router {
    let api = Router::new()
        .route("/transactions", post(transactions::begin))
        .route("/transactions/{tx_id}/commit", post(transactions::commit))
        .route("/transactions/{tx_id}/rollback", post(transactions::rollback))
        .route(
            "/api/collections/{name}",
            get(collections::list).post(collections::create),
        )
        .route(
            "/api/collections/{name}/{id}",
            get(collections::get_one).patch(collections::update).delete(collections::delete),
        )
        .route("/api/functions", get(functions::list))
        .route("/api/functions/{name}", post(functions::invoke))
        .route("/api/realtime", get(realtime::upgrade))
        .route("/metrics", get(metrics::export))
        .route("/admin/requests", get(admin::requests))
        .route("/admin/config", get(admin::config))
        .route(
            "/admin/hooks",
            get(admin::list_hooks).post(admin::install_hook),
        )
        .route("/admin/schedules", post(admin::register_schedule))
        .route("/admin/schedules/{id}", delete(admin::remove_schedule));

    api.layer(middleware::from_fn_with_state(state.clone(), observe))
        .layer(RequestDecompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
