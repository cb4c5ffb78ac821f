use std::{collections::HashMap, sync::Arc, time::Duration};

use alyx_base::{dispatch_keys, opaque_token};
use alyx_metrics::{EVENTS_DISPATCHED_TOTAL, EVENTS_PUBLISHED_TOTAL};
use alyx_storage::Gateway;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::store::{self, Event, Status};

/// An in-process subscriber invoked when a published event matches its
/// (type, source, action) pattern. `source`/`action` may be `"*"` at
/// registration time (§3 Subscription); the bus itself only ever compares
/// literal dispatch keys built from the concrete event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// The `events {retention, process_interval, cleanup_interval}` config
/// section (§6).
#[derive(Debug, Clone)]
pub struct EventsConfig {
    pub retention: Duration,
    pub process_interval: Duration,
    pub cleanup_interval: Duration,
    pub batch_size: u32,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(7 * 24 * 3600),
            process_interval: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

type HandlerKey = (String, String, String);

/// Durable event queue backed by the Storage Gateway, plus the in-process
/// subscriber registry and dispatch loops (§4.C).
pub struct EventBus {
    gateway: Gateway,
    config: EventsConfig,
    handlers: RwLock<HashMap<HandlerKey, Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub async fn new(gateway: Gateway, config: EventsConfig) -> anyhow::Result<Arc<Self>> {
        gateway.ensure_schema(store::ensure_schema).await?;
        Ok(Arc::new(Self { gateway, config, handlers: RwLock::new(HashMap::new()) }))
    }

    /// `Subscribe(type, source, action, handler)`. `source`/`action` of
    /// `"*"` match any value at dispatch time.
    pub fn subscribe(&self, event_type: &str, source: &str, action: &str, handler: Arc<dyn EventHandler>) {
        let key = (event_type.to_string(), source.to_string(), action.to_string());
        self.handlers.write().entry(key).or_default().push(handler);
    }

    /// `Publish(event)`: assigns id, created_at=now, status=pending,
    /// persists, returns immediately.
    pub async fn publish(
        &self,
        event_type: &str,
        source: &str,
        action: &str,
        payload: Json,
        metadata: Json,
    ) -> anyhow::Result<String> {
        self.publish_deferred(event_type, source, action, payload, metadata, None).await
    }

    /// `Publish` with an explicit `process_at` (used by the Schedule Engine
    /// to defer dispatch fairly under backlog, and by hook retry backoff).
    pub async fn publish_deferred(
        &self,
        event_type: &str,
        source: &str,
        action: &str,
        payload: Json,
        metadata: Json,
        process_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<String> {
        let id = opaque_token();
        let event_type_owned = event_type.to_string();
        let source_owned = source.to_string();
        let action_owned = action.to_string();
        let id_for_tx = id.clone();
        self.gateway
            .with_writer(move |conn| {
                store::insert(
                    conn,
                    &id_for_tx,
                    &event_type_owned,
                    &source_owned,
                    &action_owned,
                    &payload,
                    &metadata,
                    process_at,
                )
                .map_err(Into::into)
            })
            .await?;
        EVENTS_PUBLISHED_TOTAL.with_label_values(&[event_type, source]).inc();
        Ok(id)
    }

    fn matching_handlers(&self, event: &Event) -> Vec<Arc<dyn EventHandler>> {
        let keys = dispatch_keys(&event.event_type, &event.source, &event.action);
        let handlers = self.handlers.read();
        keys.iter().flat_map(|key| handlers.get(key).cloned().unwrap_or_default()).collect()
    }

    async fn dispatch_one(&self, event: Event, loop_name: &'static str) -> anyhow::Result<()> {
        let claimed = self
            .gateway
            .with_writer({
                let id = event.id.clone();
                move |conn| store::try_mark_processing(conn, &id).map_err(Into::into)
            })
            .await?;
        if !claimed {
            return Ok(());
        }

        let handlers = self.matching_handlers(&event);
        let mut any_failed = false;
        for handler in handlers {
            let event_clone = event.clone();
            let result = tokio::spawn(async move { handler.handle(&event_clone).await }).await;
            match result {
                Ok(Ok(())) => {},
                Ok(Err(err)) => {
                    any_failed = true;
                    warn!(event_id = %event.id, loop_name, %err, "event handler failed");
                },
                Err(join_err) => {
                    any_failed = true;
                    warn!(event_id = %event.id, loop_name, %join_err, "event handler panicked");
                },
            }
        }

        let status = if any_failed { Status::Failed } else { Status::Completed };
        self.gateway
            .with_writer({
                let id = event.id.clone();
                move |conn| store::mark_terminal(conn, &id, status).map_err(Into::into)
            })
            .await?;
        EVENTS_DISPATCHED_TOTAL.with_label_values(&[&event.event_type, &event.source, status.as_str()]).inc();
        Ok(())
    }

    async fn dispatch_batch(&self, events: Vec<Event>, loop_name: &'static str) {
        if events.is_empty() {
            return;
        }
        debug!(batch_len = events.len(), loop_name, "dispatching event batch");
        let timer = alyx_metrics::StatusTimer::new(&alyx_metrics::EVENT_DISPATCH_BATCH_DURATION_SECONDS, &[loop_name]);
        for event in events {
            if let Err(err) = self.dispatch_one(event, loop_name).await {
                warn!(%err, loop_name, "event dispatch batch step failed");
            }
        }
        timer.finish("ok");
    }

    /// Spawns the pending loop, scheduled loop, and retention cleanup loop.
    /// Returns their join handles so the server can await them at shutdown.
    pub fn spawn_loops(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let pending = {
            let bus = self.clone();
            tokio::spawn(async move { bus.pending_loop().await })
        };
        let scheduled = {
            let bus = self.clone();
            tokio::spawn(async move { bus.scheduled_loop().await })
        };
        let cleanup = {
            let bus = self.clone();
            tokio::spawn(async move { bus.cleanup_loop().await })
        };
        vec![pending, scheduled, cleanup]
    }

    async fn pending_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.config.process_interval);
        loop {
            tick.tick().await;
            match self.gateway.with_reader({
                let limit = self.config.batch_size;
                move |conn| store::select_pending_immediate(conn, limit).map_err(Into::into)
            }).await {
                Ok(events) => self.dispatch_batch(events, "pending").await,
                Err(err) => warn!(%err, "pending loop query failed"),
            }
        }
    }

    async fn scheduled_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.config.process_interval);
        loop {
            tick.tick().await;
            match self.gateway.with_reader({
                let limit = self.config.batch_size;
                move |conn| store::select_pending_scheduled(conn, limit).map_err(Into::into)
            }).await {
                Ok(events) => self.dispatch_batch(events, "scheduled").await,
                Err(err) => warn!(%err, "scheduled loop query failed"),
            }
        }
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.config.cleanup_interval);
        let retention = chrono::Duration::from_std(self.config.retention).unwrap_or(chrono::Duration::days(7));
        loop {
            tick.tick().await;
            let horizon = alyx_base::now() - retention;
            match self.gateway.with_writer(move |conn| store::delete_terminal_before(conn, horizon).map_err(Into::into)).await {
                Ok(removed) if removed > 0 => debug!(removed, "retention cleanup removed terminal events"),
                Ok(_) => {},
                Err(err) => warn!(%err, "retention cleanup failed"),
            }
        }
    }

    pub async fn find(&self, id: &str) -> anyhow::Result<Option<Event>> {
        let id = id.to_string();
        self.gateway.with_reader(move |conn| store::find(conn, &id).map_err(Into::into)).await
    }

    /// Count of non-terminal events for `source`, for a subscriber's own
    /// overlap bookkeeping (the Schedule Engine's `skip_if_running`/
    /// `max_overlap`, §4.D).
    pub async fn count_non_terminal(&self, source: &str) -> anyhow::Result<u64> {
        let source = source.to_string();
        self.gateway.with_reader(move |conn| store::count_non_terminal(conn, &source).map_err(Into::into)).await
    }

    /// Failed events of a given type, oldest first, for a subscriber's own
    /// retry bookkeeping.
    pub async fn failed_events_of_type(&self, event_type: &str, limit: u32) -> anyhow::Result<Vec<Event>> {
        let event_type = event_type.to_string();
        self.gateway.with_reader(move |conn| store::select_failed(conn, &event_type, limit).map_err(Into::into)).await
    }

    /// All events recorded for `source`, newest first (admin inspection and
    /// tests).
    pub async fn events_for_source(&self, source: &str, limit: u32) -> anyhow::Result<Vec<Event>> {
        let source = source.to_string();
        self.gateway.with_reader(move |conn| store::select_by_source(conn, &source, limit).map_err(Into::into)).await
    }

    /// Removes an event row outright, used when a subscriber has already
    /// converted a terminal event into a derivative follow-up and does not
    /// want it reconsidered on the next retry sweep.
    pub async fn delete(&self, id: &str) -> anyhow::Result<()> {
        let id = id.to_string();
        self.gateway.with_writer(move |conn| store::delete(conn, &id).map_err(Into::into)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    async fn bus() -> Arc<EventBus> {
        EventBus::new(Gateway::open_in_memory().unwrap(), EventsConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn publish_then_pending_dispatch_marks_completed() {
        let bus = bus().await;
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("http", "users", "create", Arc::new(CountingHandler(count.clone())));

        let id = bus.publish("http", "users", "create", json!({"k": "v"}), json!({})).await.unwrap();
        let events = bus
            .gateway
            .with_reader(|conn| store::select_pending_immediate(conn, 10).map_err(Into::into))
            .await
            .unwrap();
        bus.dispatch_batch(events, "pending").await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let event = bus.find(&id).await.unwrap().unwrap();
        assert_eq!(event.status, Status::Completed);
        assert!(event.processed_at.is_some());
    }

    #[tokio::test]
    async fn wildcard_source_matches_any_source_same_action() {
        let bus = bus().await;
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("http", "*", "create", Arc::new(CountingHandler(count.clone())));

        bus.publish("http", "posts", "create", json!({}), json!({})).await.unwrap();
        bus.publish("http", "posts", "delete", json!({}), json!({})).await.unwrap();
        let events = bus
            .gateway
            .with_reader(|conn| store::select_pending_immediate(conn, 10).map_err(Into::into))
            .await
            .unwrap();
        bus.dispatch_batch(events, "pending").await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn any_failing_handler_marks_event_failed_but_does_not_abort_batch() {
        let bus = bus().await;
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("http", "users", "create", Arc::new(FailingHandler));
        bus.subscribe("http", "users", "create", Arc::new(CountingHandler(count.clone())));

        let id = bus.publish("http", "users", "create", json!({}), json!({})).await.unwrap();
        let events = bus
            .gateway
            .with_reader(|conn| store::select_pending_immediate(conn, 10).map_err(Into::into))
            .await
            .unwrap();
        bus.dispatch_batch(events, "pending").await;

        assert_eq!(count.load(Ordering::SeqCst), 1, "peer handler still invoked");
        let event = bus.find(&id).await.unwrap().unwrap();
        assert_eq!(event.status, Status::Failed);
    }

    #[tokio::test]
    async fn deferred_event_is_skipped_by_immediate_loop() {
        let bus = bus().await;
        bus.publish_deferred(
            "schedule",
            "s1",
            "run",
            json!({}),
            json!({}),
            Some(alyx_base::now() - chrono::Duration::seconds(5)),
        )
        .await
        .unwrap();

        let immediate = bus
            .gateway
            .with_reader(|conn| store::select_pending_immediate(conn, 10).map_err(Into::into))
            .await
            .unwrap();
        assert!(immediate.is_empty());

        let scheduled = bus
            .gateway
            .with_reader(|conn| store::select_pending_scheduled(conn, 10).map_err(Into::into))
            .await
            .unwrap();
        assert_eq!(scheduled.len(), 1);
    }
}
