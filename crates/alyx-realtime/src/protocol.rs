//! Wire shapes for the WebSocket subscription protocol (§4.G, §6).
//!
//! Client-to-server messages are parsed with `serde`; server-to-client
//! messages are built ad hoc with `serde_json::json!`, since their shapes
//! differ enough variant-to-variant (a nested `payload` for `connected`, flat
//! fields for `snapshot`/`delta`) that a single tagged enum would fight the
//! literal wire shapes in §4.G more than it would help.

use serde::Deserialize;
use serde_json::{json, Value as Json};

use alyx_storage::Filter;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { id: String, payload: SubscribePayload },
    Unsubscribe { id: String, payload: UnsubscribePayload },
}

#[derive(Debug, Deserialize)]
pub struct SubscribePayload {
    pub collection: String,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub sort: Vec<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribePayload {
    pub subscription_id: String,
}

pub fn connected(client_id: &str) -> Json {
    json!({"type": "connected", "payload": {"client_id": client_id}})
}

pub fn snapshot(subscription_id: &str, docs: Vec<Json>, total: u64) -> Json {
    json!({"type": "snapshot", "subscription_id": subscription_id, "docs": docs, "total": total})
}

pub fn delta(subscription_id: &str, inserts: Vec<Json>, updates: Vec<Json>, deletes: Vec<Json>) -> Json {
    json!({
        "type": "delta",
        "subscription_id": subscription_id,
        "changes": {"inserts": inserts, "updates": updates, "deletes": deletes},
    })
}

pub fn error(message: impl Into<String>) -> Json {
    json!({"type": "error", "payload": {"message": message.into()}})
}

pub fn unsubscribed(subscription_id: &str) -> Json {
    json!({"type": "unsubscribed", "payload": {"subscription_id": subscription_id}})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe_with_default_filter_and_sort() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "subscribe",
            "id": "sub1",
            "payload": {"collection": "messages"},
        }))
        .unwrap();
        match msg {
            ClientMessage::Subscribe { id, payload } => {
                assert_eq!(id, "sub1");
                assert_eq!(payload.collection, "messages");
                assert!(payload.filter.0.is_empty());
            },
            _ => panic!("expected subscribe"),
        }
    }

    #[test]
    fn parses_unsubscribe() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "unsubscribe",
            "id": "req1",
            "payload": {"subscription_id": "sub1"},
        }))
        .unwrap();
        match msg {
            ClientMessage::Unsubscribe { payload, .. } => assert_eq!(payload.subscription_id, "sub1"),
            _ => panic!("expected unsubscribe"),
        }
    }

    #[test]
    fn connected_message_shape() {
        let msg = connected("c1");
        assert_eq!(msg["type"], "connected");
        assert_eq!(msg["payload"]["client_id"], "c1");
    }
}
