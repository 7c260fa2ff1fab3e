//! Change stream route.

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use kvsync_engine::InstanceId;
use serde::Deserialize;

use crate::error::Result;
use crate::handlers::handle_stream_connection;
use crate::origin::Origin;
use crate::AppState;

/// Query parameters for the stream. Browsers cannot set headers on a
/// WebSocket handshake, so the instance may also be passed here.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub instance: Option<String>,
}

/// Create stream routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/api/stream", get(stream_handler))
}

/// GET /api/stream - Upgrade to the WebSocket change stream.
async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Origin(header_origin): Origin,
    Query(query): Query<StreamQuery>,
) -> Result<Response> {
    let instance = match query.instance {
        Some(raw) => Some(InstanceId::parse(raw)?),
        None => header_origin,
    };

    let notifier = state.store.notifier().clone();
    let heartbeat = state.config.heartbeat;

    Ok(ws.on_upgrade(move |socket| {
        handle_stream_connection(socket, notifier, instance, heartbeat)
    }))
}
