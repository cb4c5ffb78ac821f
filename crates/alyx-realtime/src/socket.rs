use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use alyx_storage::query::SortClause;

use crate::{
    client::ClientHandle,
    hub::RealtimeHub,
    protocol::{self, ClientMessage},
};

/// Drives one accepted WebSocket connection for its whole lifetime: sends
/// `connected`, then runs a reader loop (parses `subscribe`/`unsubscribe`)
/// and a writer loop (drains the client's outbound channel) concurrently,
/// mirroring the teacher's paired reader/writer task pattern for realtime
/// sockets. Either loop ending (socket closed, channel closed) ends the
/// connection and unregisters the client.
pub async fn handle_socket(hub: Arc<RealtimeHub>, socket: WebSocket) {
    let Some((client, outbound_rx)) = hub.register_client() else {
        let mut socket = socket;
        let _ =
            socket.send(Message::Text(protocol::error("realtime connection limit reached").to_string().into())).await;
        let _ = socket.close().await;
        return;
    };

    let (mut sink, mut stream) = socket.split();
    let client_id = client.id.clone();

    if sink.send(Message::Text(protocol::connected(&client_id).to_string().into())).await.is_err() {
        hub.remove_client(&client_id);
        return;
    }

    let writer = async move {
        let mut outbound_rx = outbound_rx;
        while let Some(msg) = outbound_rx.recv().await {
            if sink.send(Message::Text(msg.to_string().into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    };

    let reader = {
        let hub = hub.clone();
        let client = client.clone();
        async move {
            while let Some(Ok(msg)) = stream.next().await {
                match msg {
                    Message::Text(text) => handle_text_message(&hub, &client, &text).await,
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {},
                }
            }
        }
    };

    tokio::join!(writer, reader);
    hub.remove_client(&client_id);
    debug!(client_id, "realtime client disconnected");
}

async fn handle_text_message(hub: &Arc<RealtimeHub>, client: &Arc<ClientHandle>, text: &str) {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    match parsed {
        Ok(ClientMessage::Subscribe { id, payload }) => {
            let sort: anyhow::Result<Vec<SortClause>> = payload.sort.iter().map(|s| SortClause::parse(s)).collect();
            let sort = match sort {
                Ok(sort) => sort,
                Err(err) => {
                    let _ = client.outbound.try_send(protocol::error(err.to_string()));
                    return;
                },
            };
            if let Err(err) =
                hub.subscribe(client, id.clone(), payload.collection, payload.filter, sort, payload.limit).await
            {
                warn!(%err, subscription_id = %id, "subscribe failed");
                let _ = client.outbound.try_send(protocol::error(err.to_string()));
            }
        },
        Ok(ClientMessage::Unsubscribe { payload, .. }) => {
            hub.unsubscribe(client, &payload.subscription_id);
            let _ = client.outbound.try_send(protocol::unsubscribed(&payload.subscription_id));
        },
        Err(err) => {
            let _ = client.outbound.try_send(protocol::error(format!("invalid message: {err}")));
        },
    }
}
