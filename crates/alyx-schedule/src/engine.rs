use std::{sync::Arc, time::Duration};

use alyx_events::EventBus;
use alyx_storage::Gateway;
use chrono::Duration as ChronoDuration;
use tracing::{debug, warn};

use crate::{next_run::compute_next_run, store, types::Schedule};

const RETRY_EVENT_TYPE: &str = "schedule";
const RETRY_COUNT_KEY: &str = "alyx_retry_count";

/// Schedule Engine (§4.D): computes `next_run` for each registered schedule
/// and, on a ticker, publishes a `schedule` event for every schedule whose
/// `next_run` has arrived, honoring `skip_if_running`/`max_overlap`, and
/// retries failed schedule-sourced events with exponential backoff.
pub struct ScheduleEngine {
    gateway: Gateway,
    bus: Arc<EventBus>,
    tick_interval: Duration,
}

impl ScheduleEngine {
    pub async fn new(gateway: Gateway, bus: Arc<EventBus>, tick_interval: Duration) -> anyhow::Result<Self> {
        gateway.ensure_schema(store::ensure_schema).await?;
        Ok(Self { gateway, bus, tick_interval })
    }

    /// Registers (or replaces) a schedule, computing its initial `next_run`
    /// if one hasn't been persisted yet.
    pub async fn register(&self, mut schedule: Schedule) -> anyhow::Result<()> {
        let now = alyx_base::now();
        if schedule.last_run.is_none() {
            if let Some(next) = compute_next_run(&schedule.kind, None, now)? {
                schedule.next_run = next;
            }
        }
        self.gateway.with_writer(move |conn| store::upsert(conn, &schedule).map_err(Into::into)).await
    }

    pub async fn remove(&self, id: &str) -> anyhow::Result<()> {
        let id = id.to_string();
        self.gateway.with_writer(move |conn| store::remove(conn, &id).map_err(Into::into)).await
    }

    pub fn spawn_loops(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let tick = {
            let engine = self.clone();
            tokio::spawn(async move { engine.tick_loop().await })
        };
        let retry = {
            let engine = self.clone();
            tokio::spawn(async move { engine.retry_loop().await })
        };
        vec![tick, retry]
    }

    async fn tick_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            interval.tick().await;
            let now = alyx_base::now();
            let due = match self.gateway.with_reader(move |conn| store::due(conn, now).map_err(Into::into)).await {
                Ok(due) => due,
                Err(err) => {
                    warn!(%err, "schedule due-query failed");
                    continue;
                },
            };
            for schedule in due {
                if let Err(err) = self.fire(schedule, now).await {
                    warn!(%err, "schedule tick failed");
                }
            }
        }
    }

    async fn fire(&self, schedule: Schedule, now: chrono::DateTime<chrono::Utc>) -> anyhow::Result<()> {
        let non_terminal = self.bus.count_non_terminal(&schedule.id).await?;
        let skip = (schedule.config.skip_if_running && non_terminal > 0)
            || (schedule.config.max_overlap > 0 && non_terminal >= schedule.config.max_overlap as u64);

        if !skip {
            self.bus
                .publish_deferred(
                    "schedule",
                    &schedule.id,
                    "run",
                    schedule.config.input.clone(),
                    serde_json::json!({}),
                    Some(schedule.next_run),
                )
                .await?;
        } else {
            debug!(schedule_id = %schedule.id, non_terminal, "schedule tick skipped");
        }

        // Invariant: next_run advances whether or not this tick actually
        // dispatched (§3 "on skip, next_run still advances").
        let next = compute_next_run(&schedule.kind, Some(schedule.next_run), now)?;
        let id = schedule.id.clone();
        let last_run = schedule.next_run;
        self.gateway.with_writer(move |conn| store::advance(conn, &id, last_run, next).map_err(Into::into)).await
    }

    async fn retry_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            interval.tick().await;
            let failed = match self.bus.failed_events_of_type(RETRY_EVENT_TYPE, 100).await {
                Ok(events) => events,
                Err(err) => {
                    warn!(%err, "schedule retry query failed");
                    continue;
                },
            };
            for event in failed {
                if let Err(err) = self.maybe_retry(event).await {
                    warn!(%err, "schedule retry dispatch failed");
                }
            }
        }
    }

    async fn maybe_retry(&self, event: alyx_events::Event) -> anyhow::Result<()> {
        let schedule = self.gateway.with_reader({
            let id = event.source.clone();
            move |conn| store::find(conn, &id).map_err(Into::into)
        }).await?;
        let Some(schedule) = schedule else {
            // Schedule no longer exists; drop the stale failure.
            self.bus.delete(&event.id).await?;
            return Ok(());
        };

        if !schedule.config.retry_on_failure {
            self.bus.delete(&event.id).await?;
            return Ok(());
        }

        let retry_count = event.metadata.get(RETRY_COUNT_KEY).and_then(|v| v.as_u64()).unwrap_or(0);
        if retry_count >= schedule.config.max_retries as u64 {
            self.bus.delete(&event.id).await?;
            return Ok(());
        }

        let backoff = ChronoDuration::seconds(2i64.saturating_pow(retry_count as u32 + 1).min(60));
        let metadata = serde_json::json!({ RETRY_COUNT_KEY: retry_count + 1 });
        self.bus
            .publish_deferred(
                "schedule",
                &schedule.id,
                "retry",
                event.payload.clone(),
                metadata,
                Some(alyx_base::now() + backoff),
            )
            .await?;
        self.bus.delete(&event.id).await
    }
}
