/// `GET /metrics` -> Prometheus exposition (§4.J, §6).
pub async fn export() -> String {
    alyx_metrics::export()
}
