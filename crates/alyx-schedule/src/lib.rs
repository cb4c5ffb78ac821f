//! Schedule Engine (§4.D): cron/interval/one-shot schedules that publish
//! `schedule` events onto the Event Bus, with overlap control and
//! exponential-backoff retry on failure.

mod engine;
mod next_run;
mod store;
mod types;

pub use engine::ScheduleEngine;
pub use next_run::compute_next_run;
pub use types::{Schedule, ScheduleExecConfig, ScheduleKind};
