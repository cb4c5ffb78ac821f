use std::time::Instant;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::state::AppState;

/// Installed once, ahead of routing (§6 "logging middleware"): records the
/// HTTP request/latency metrics (§4.J) and appends a Request-Log Ring entry
/// (§4.I) for every request, success or failure. Replaces the teacher's
/// `tower_http::trace::TraceLayer` with a custom layer since request
/// logging here also feeds the ring, not just `tracing` spans.
pub async fn observe(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let raw_path = request.uri().path().to_string();
    let normalized_path = alyx_metrics::normalize_path(&raw_path);
    let start = Instant::now();

    alyx_metrics::HTTP_IN_FLIGHT.inc();
    let response = next.run(request).await;
    alyx_metrics::HTTP_IN_FLIGHT.dec();

    let elapsed = start.elapsed();
    let status = response.status().as_u16();

    alyx_metrics::HTTP_REQUESTS_TOTAL.with_label_values(&[&method, &normalized_path, &status.to_string()]).inc();
    alyx_metrics::HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &normalized_path])
        .observe(elapsed.as_secs_f64());

    state.request_log.record(method.clone(), raw_path.clone(), status, elapsed.as_millis() as u64, None);

    tracing::info!(
        method = %method,
        path = %raw_path,
        status,
        duration_ms = elapsed.as_millis() as u64,
        "request handled"
    );

    response
}
