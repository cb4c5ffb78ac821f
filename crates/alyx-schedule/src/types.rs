use chrono::{DateTime, Utc};
use serde_json::Value as Json;

/// The three schedule kinds from the data model (§3), generalized from the
/// informally described sugars into one enum whose `Cron` variant takes a
/// raw five-field expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleKind {
    Cron { expression: String },
    Interval { seconds: u64 },
    OneTime { at: DateTime<Utc> },
}

impl ScheduleKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ScheduleKind::Cron { .. } => "cron",
            ScheduleKind::Interval { .. } => "interval",
            ScheduleKind::OneTime { .. } => "one_time",
        }
    }

    /// The raw `expression` column value: the cron string, the interval in
    /// seconds, or the RFC3339 timestamp, depending on kind.
    pub fn expression(&self) -> String {
        match self {
            ScheduleKind::Cron { expression } => expression.clone(),
            ScheduleKind::Interval { seconds } => seconds.to_string(),
            ScheduleKind::OneTime { at } => alyx_base::to_rfc3339(*at),
        }
    }

    pub fn from_parts(tag: &str, expression: &str) -> anyhow::Result<Self> {
        match tag {
            "cron" => Ok(ScheduleKind::Cron { expression: expression.to_string() }),
            "interval" => Ok(ScheduleKind::Interval {
                seconds: expression.parse().map_err(|_| anyhow::anyhow!("invalid interval seconds"))?,
            }),
            "one_time" => Ok(ScheduleKind::OneTime { at: alyx_base::parse_rfc3339(expression)? }),
            other => Err(anyhow::anyhow!("unknown schedule kind {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleExecConfig {
    pub skip_if_running: bool,
    pub max_overlap: u32,
    pub retry_on_failure: bool,
    pub max_retries: u32,
    pub input: Json,
}

impl Default for ScheduleExecConfig {
    fn default() -> Self {
        Self {
            skip_if_running: false,
            max_overlap: 0,
            retry_on_failure: false,
            max_retries: 0,
            input: Json::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub id: String,
    pub kind: ScheduleKind,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub timezone: String,
    pub execution_count: u64,
    pub config: ScheduleExecConfig,
}
