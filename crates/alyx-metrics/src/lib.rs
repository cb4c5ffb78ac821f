//! Thin wrapper over `prometheus` for the counters/histograms/gauges listed
//! in the Admin/Config Surface design (§4.J): HTTP request counters and
//! latency, an in-flight gauge, DB pool stats, realtime connection/
//! subscription gauges, function invocation counters and latency, and
//! runtime pool size gauges.

use std::{cell::Cell, time::Instant};

use once_cell::sync::Lazy;
use prometheus::{
    HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Registry, TextEncoder,
};
use regex::Regex;

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

macro_rules! registered {
    ($ty:ty, $ctor:expr) => {{
        let metric = $ctor;
        REGISTRY
            .register(Box::new(metric.clone()))
            .expect("duplicate metric registration");
        metric
    }};
}

pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    registered!(
        IntCounterVec,
        IntCounterVec::new(
            prometheus::opts!("alyx_http_requests_total", "HTTP requests by method/path/status"),
            &["method", "path", "status"],
        )
        .unwrap()
    )
});

pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    registered!(
        HistogramVec,
        HistogramVec::new(
            prometheus::histogram_opts!(
                "alyx_http_request_duration_seconds",
                "HTTP request latency by method/path"
            ),
            &["method", "path"],
        )
        .unwrap()
    )
});

pub static HTTP_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    registered!(
        IntGauge,
        IntGauge::new("alyx_http_in_flight", "HTTP requests currently being served").unwrap()
    )
});

pub static DB_POOL_OPEN_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    registered!(
        IntGauge,
        IntGauge::new("alyx_db_pool_open_connections", "Open connections in the read pool")
            .unwrap()
    )
});

pub static DB_POOL_IDLE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    registered!(
        IntGauge,
        IntGauge::new("alyx_db_pool_idle_connections", "Idle connections in the read pool")
            .unwrap()
    )
});

pub static REALTIME_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    registered!(
        IntGauge,
        IntGauge::new("alyx_realtime_connections", "Connected realtime WebSocket clients")
            .unwrap()
    )
});

pub static REALTIME_SUBSCRIPTIONS: Lazy<IntGauge> = Lazy::new(|| {
    registered!(
        IntGauge,
        IntGauge::new("alyx_realtime_subscriptions", "Active realtime subscriptions").unwrap()
    )
});

pub static FUNCTION_INVOCATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    registered!(
        IntCounterVec,
        IntCounterVec::new(
            prometheus::opts!(
                "alyx_function_invocations_total",
                "Function invocations by name/outcome"
            ),
            &["function", "outcome"],
        )
        .unwrap()
    )
});

pub static FUNCTION_INVOCATION_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    registered!(
        HistogramVec,
        HistogramVec::new(
            prometheus::histogram_opts!(
                "alyx_function_invocation_duration_seconds",
                "Function invocation latency by name"
            ),
            &["function"],
        )
        .unwrap()
    )
});

pub static RUNTIME_POOL_SIZE: Lazy<IntGaugeVec> = Lazy::new(|| {
    registered!(
        IntGaugeVec,
        IntGaugeVec::new(
            prometheus::opts!("alyx_runtime_pool_size", "In-flight subprocess count by runtime"),
            &["runtime"],
        )
        .unwrap()
    )
});

pub static EVENTS_PUBLISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    registered!(
        IntCounterVec,
        IntCounterVec::new(
            prometheus::opts!("alyx_events_published_total", "Events published by type/source"),
            &["type", "source"],
        )
        .unwrap()
    )
});

pub static EVENTS_DISPATCHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    registered!(
        IntCounterVec,
        IntCounterVec::new(
            prometheus::opts!(
                "alyx_events_dispatched_total",
                "Events reaching a terminal status by type/source/status"
            ),
            &["type", "source", "status"],
        )
        .unwrap()
    )
});

pub static EVENT_DISPATCH_BATCH_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    registered!(
        HistogramVec,
        HistogramVec::new(
            prometheus::histogram_opts!(
                "alyx_event_dispatch_batch_duration_seconds",
                "Event dispatch batch latency by loop"
            ),
            &["loop_name"],
        )
        .unwrap()
    )
});

pub static HOOK_INVOCATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    registered!(
        IntCounterVec,
        IntCounterVec::new(
            prometheus::opts!(
                "alyx_hook_invocations_total",
                "Hook/webhook dispatch attempts by hook id and outcome"
            ),
            &["hook_id", "outcome"],
        )
        .unwrap()
    )
});

pub static HOOK_INVOCATION_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    registered!(
        HistogramVec,
        HistogramVec::new(
            prometheus::histogram_opts!(
                "alyx_hook_invocation_duration_seconds",
                "Hook/webhook dispatch latency by hook id"
            ),
            &["hook_id"],
        )
        .unwrap()
    )
});

/// Renders the registry in Prometheus text exposition format for `GET
/// /metrics`.
pub fn export() -> String {
    let families = REGISTRY.gather();
    let mut buf = String::new();
    TextEncoder::new().encode_utf8(&families, &mut buf).expect("encode metrics");
    buf
}

/// RAII latency timer: records into `histogram` on drop. Mirrors the
/// teacher's `Timer`/`StatusTimer` pattern, simplified to a stable-Rust
/// single-label status cell instead of a mutable label set.
pub struct StatusTimer<'a> {
    start: Instant,
    histogram: &'a HistogramVec,
    labels: Vec<String>,
    status: Cell<&'static str>,
}

impl<'a> StatusTimer<'a> {
    pub fn new(histogram: &'a HistogramVec, labels: &[&str]) -> Self {
        Self {
            start: Instant::now(),
            histogram,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            status: Cell::new("ok"),
        }
    }

    pub fn finish(self, status: &'static str) {
        self.status.set(status);
    }
}

impl Drop for StatusTimer<'_> {
    fn drop(&mut self) {
        let label_refs: Vec<&str> = self.labels.iter().map(String::as_str).collect();
        if let Ok(hist) = self.histogram.get_metric_with_label_values(&label_refs) {
            hist.observe(self.start.elapsed().as_secs_f64());
        }
    }
}

static PARAM_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-zA-Z_-]{8,}$").unwrap());

/// Normalizes a concrete request path into a low-cardinality template for
/// metric labels, e.g. `/api/collections/users/6f3c...` ->
/// `/api/collections/users/{param}`. Segments that look like opaque ids
/// (long alphanumeric tokens) are replaced; short path segments (collection
/// names, route words) are left alone.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if seg.is_empty() || !PARAM_SEGMENT.is_match(seg) {
                seg.to_string()
            } else {
                "{param}".to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_opaque_id_segments() {
        assert_eq!(
            normalize_path("/api/collections/users/6f3c9e2a1b0d4f5e"),
            "/api/collections/users/{param}"
        );
        assert_eq!(normalize_path("/api/functions"), "/api/functions");
        assert_eq!(normalize_path("/metrics"), "/metrics");
    }

    #[test]
    fn export_produces_nonempty_text() {
        HTTP_IN_FLIGHT.set(3);
        let text = export();
        assert!(text.contains("alyx_http_in_flight"));
    }
}
