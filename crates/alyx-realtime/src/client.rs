use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value as Json;
use tokio::sync::mpsc;

use crate::subscription::Subscription;

/// Per-client state (§5: "per-client state is owned by that client's
/// reader/writer task pair; outbound is a bounded channel of pre-serialized
/// frames"). The hub holds a registry of these under a reader/writer lock;
/// the subscriptions map inside each client is its own lock so a slow
/// subscribe/unsubscribe on one client never blocks fan-out to another.
pub struct ClientHandle {
    pub id: String,
    pub outbound: mpsc::Sender<Json>,
    pub subscriptions: RwLock<HashMap<String, Subscription>>,
}

impl ClientHandle {
    pub fn new(id: String, outbound: mpsc::Sender<Json>) -> Self {
        Self { id, outbound, subscriptions: RwLock::new(HashMap::new()) }
    }
}
