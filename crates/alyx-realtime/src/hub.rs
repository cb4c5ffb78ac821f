use std::{collections::HashMap, sync::Arc, time::Duration};

use alyx_base::{opaque_token, AlyxError};
use alyx_events::EventBus;
use alyx_metrics::{REALTIME_CONNECTIONS, REALTIME_SUBSCRIPTIONS};
use alyx_storage::{
    changelog::{ChangeLogRecord, Operation},
    query::{matches_filter, Filter, SortClause},
    Gateway, QueryOptions,
};
use parking_lot::RwLock;
use serde_json::Value as Json;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{client::ClientHandle, config::RealtimeConfig, protocol};

/// Change Feed poller + Realtime Hub (§4.G): one poller reads new change-log
/// rows, publishes a `database` event per row, and fans out matching deltas
/// to connected WebSocket clients. The hub's client registry is guarded by a
/// reader/writer lock per §5; each client's own subscription map is a
/// separate lock so fan-out to one client never blocks another.
pub struct RealtimeHub {
    gateway: Gateway,
    bus: Arc<EventBus>,
    config: RealtimeConfig,
    clients: RwLock<HashMap<String, Arc<ClientHandle>>>,
}

impl RealtimeHub {
    pub fn new(gateway: Gateway, bus: Arc<EventBus>, config: RealtimeConfig) -> Arc<Self> {
        Arc::new(Self { gateway, bus, config, clients: RwLock::new(HashMap::new()) })
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Registers a new client if the hub is under `max_connections`, and
    /// returns its handle plus the receiving half of its outbound channel
    /// for the WebSocket writer loop to drain.
    pub fn register_client(&self) -> Option<(Arc<ClientHandle>, mpsc::Receiver<Json>)> {
        let mut clients = self.clients.write();
        if clients.len() >= self.config.max_connections {
            return None;
        }
        let id = opaque_token();
        let (tx, rx) = mpsc::channel(self.config.change_buffer_size.max(1));
        let handle = Arc::new(ClientHandle::new(id.clone(), tx));
        clients.insert(id, handle.clone());
        REALTIME_CONNECTIONS.set(clients.len() as i64);
        Some((handle, rx))
    }

    pub fn remove_client(&self, client_id: &str) {
        let mut clients = self.clients.write();
        if let Some(handle) = clients.remove(client_id) {
            let active = handle.subscriptions.read().len();
            REALTIME_SUBSCRIPTIONS.sub(active as i64);
        }
        REALTIME_CONNECTIONS.set(clients.len() as i64);
    }

    /// Registers a subscription and sends its one-time snapshot. `filter`
    /// and `sort` must already be parsed; `subscription_id` is client-chosen
    /// (the `id` of the `subscribe` message, §4.G).
    pub async fn subscribe(
        &self,
        client: &ClientHandle,
        subscription_id: String,
        collection: String,
        filter: Filter,
        sort: Vec<SortClause>,
        limit: Option<u32>,
    ) -> anyhow::Result<()> {
        if client.subscriptions.read().len() >= self.config.max_subscriptions_per_client {
            return Err(AlyxError::validation("subscription limit reached for this client").into());
        }

        let watermark = self.gateway.change_log_high_watermark().await?;
        let opts = QueryOptions { filter: filter.clone(), sort: sort.clone(), limit, offset: None };
        let page = self.gateway.query(&collection, &opts).await?;
        let total = self.gateway.count(&collection, &filter).await?;

        client.subscriptions.write().insert(
            subscription_id.clone(),
            crate::subscription::Subscription {
                id: subscription_id.clone(),
                collection,
                filter,
                sort,
                limit,
                last_seen_change_id: watermark,
            },
        );
        REALTIME_SUBSCRIPTIONS.inc();

        // Snapshot is sent exactly once before any delta (§3 invariant); the
        // subscription is inserted first so a delta racing in from the
        // poller can only land after this send is queued.
        let _ = client.outbound.try_send(protocol::snapshot(&subscription_id, page.docs, total));
        Ok(())
    }

    pub fn unsubscribe(&self, client: &ClientHandle, subscription_id: &str) {
        if client.subscriptions.write().remove(subscription_id).is_some() {
            REALTIME_SUBSCRIPTIONS.dec();
        }
    }

    pub fn spawn_poll_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.poll_loop().await })
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut watermark = self.gateway.change_log_high_watermark().await.unwrap_or(0);
        let mut tick = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        loop {
            tick.tick().await;
            let batch = self.config.change_buffer_size.max(1) as u32;
            let rows = match self.gateway.changes_since(watermark, batch).await {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(%err, "change feed poll failed");
                    continue;
                },
            };
            for row in &rows {
                watermark = watermark.max(row.id);
                self.publish_database_event(row).await;
                self.fan_out(row);
                // Suspension point between rows, per §5's "explicit yields
                // around each polled batch".
                tokio::task::yield_now().await;
            }
        }
    }

    async fn publish_database_event(&self, row: &ChangeLogRecord) {
        let payload = row.document_image.clone().unwrap_or(Json::Null);
        let metadata = serde_json::json!({"change_id": row.id, "document_id": row.document_id});
        if let Err(err) = self.bus.publish("database", &row.collection, row.operation.as_str(), payload, metadata).await
        {
            warn!(%err, collection = %row.collection, "failed to publish database event from change feed");
        }
    }

    /// Evaluates `row` against every client's subscriptions on its
    /// collection, in-memory against the change log's own document image
    /// (§4.G: "evaluation is performed on the document image, not SQL, to
    /// avoid extra queries per change").
    fn fan_out(&self, row: &ChangeLogRecord) {
        let Some(doc) = &row.document_image else { return };
        let clients: Vec<Arc<ClientHandle>> = self.clients.read().values().cloned().collect();
        let mut slow_consumers = Vec::new();

        for client in &clients {
            let mut subs = client.subscriptions.write();
            for sub in subs.values_mut() {
                if sub.collection != row.collection {
                    continue;
                }
                sub.last_seen_change_id = sub.last_seen_change_id.max(row.id);
                if !matches_filter(doc, &sub.filter) {
                    continue;
                }
                let delta = match row.operation {
                    Operation::Insert => protocol::delta(&sub.id, vec![doc.clone()], vec![], vec![]),
                    Operation::Update => protocol::delta(&sub.id, vec![], vec![doc.clone()], vec![]),
                    Operation::Delete => protocol::delta(&sub.id, vec![], vec![], vec![doc.clone()]),
                };
                if client.outbound.try_send(delta).is_err() {
                    slow_consumers.push(client.id.clone());
                    break;
                }
            }
        }

        for client_id in slow_consumers {
            warn!(client_id, "realtime client outbound channel overflowed, dropping as slow_consumer");
            self.remove_client(&client_id);
        }
    }
}
