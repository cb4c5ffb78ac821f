/// Renders the Prometheus text exposition format for `GET /metrics` (§4.J,
/// §6). Thin re-export so `alyx-server`'s router only needs to depend on
/// `alyx-admin` for the admin surface, not reach past it into `alyx-metrics`
/// directly.
pub fn export() -> String {
    alyx_metrics::export()
}
