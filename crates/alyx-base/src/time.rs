use chrono::{DateTime, Utc};

/// All times in the core are UTC, stored and transmitted as RFC3339 strings.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub fn parse_rfc3339(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
