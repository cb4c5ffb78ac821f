use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
};

use crate::state::AppState;

/// `GET /api/realtime` upgrade (§4.G, §6): hands the accepted socket to the
/// hub, which sends `connected` and then runs the subscribe/unsubscribe
/// protocol for the lifetime of the connection.
pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| alyx_realtime::handle_socket(state.realtime, socket))
}
