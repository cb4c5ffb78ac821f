use chrono::{DateTime, Duration as ChronoDuration, Utc};
use saffron::Cron;

use crate::types::ScheduleKind;

/// Computes the next run timestamp for a schedule kind, given the previous
/// run (`None` before the schedule has ever fired) and the current time.
/// Returns `None` for a `one_time` schedule that has already fired once —
/// the caller should then treat the schedule as exhausted.
pub fn compute_next_run(
    kind: &ScheduleKind,
    prev_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<DateTime<Utc>>> {
    match kind {
        ScheduleKind::Interval { seconds } => {
            let next = match prev_run {
                Some(prev) => prev + ChronoDuration::seconds(*seconds as i64),
                None => now,
            };
            Ok(Some(next))
        },
        ScheduleKind::OneTime { at } => {
            if prev_run.is_some() {
                Ok(None)
            } else {
                Ok(Some(*at))
            }
        },
        ScheduleKind::Cron { expression } => {
            let cron: Cron = expression.parse().map_err(|err| anyhow::anyhow!("invalid cron expression: {err}"))?;
            let from = prev_run.unwrap_or(now);
            let next = cron
                .next_after(from)
                .ok_or_else(|| anyhow::anyhow!("cron expression {expression} has no future occurrence"))?;
            Ok(Some(next))
        },
    }
}
