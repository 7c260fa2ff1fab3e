//! WebSocket handler for the change stream.
//!
//! Each connection gets one notifier subscription. Change events, heartbeats
//! and ping replies are written by a forwarding task while the connection
//! task reads client frames. When either side ends, the other is aborted and
//! the subscription is dropped.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use kvsync_engine::{InstanceId, StreamMessage, StreamRequest};
use tokio::sync::mpsc;

use crate::notify::ChangeNotifier;

/// Handle an established change-stream connection.
///
/// This function:
/// 1. Subscribes to the notifier
/// 2. Spawns a task forwarding events and heartbeats to the socket
/// 3. Processes incoming frames in a loop
/// 4. Cleans up on disconnect
pub async fn handle_stream_connection(
    socket: WebSocket,
    notifier: Arc<ChangeNotifier>,
    instance: Option<InstanceId>,
    heartbeat: Duration,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    if let Some(id) = &instance {
        if notifier.is_connected(id) {
            tracing::debug!(instance = %id, "Instance opened an additional stream");
        }
    }
    let mut subscription = notifier.subscribe(instance.clone());
    let conn_id = subscription.id().to_string();

    // Replies to client frames go through the forwarding task
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<StreamMessage>();

    tracing::info!(
        conn_id = %conn_id,
        instance = ?instance,
        "Change stream connected"
    );

    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        // The first tick completes immediately
        ticker.tick().await;

        if send_message(&mut ws_sender, &StreamMessage::Hello { instance })
            .await
            .is_err()
        {
            return;
        }

        loop {
            let message = tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => StreamMessage::change(&event),
                    None => {
                        tracing::warn!(conn_id = %subscription.id(), "Subscription ended by notifier");
                        break;
                    }
                },
                Some(reply) = reply_rx.recv() => reply,
                _ = ticker.tick() => StreamMessage::Heartbeat,
            };

            if send_message(&mut ws_sender, &message).await.is_err() {
                break;
            }
        }

        let _ = ws_sender.close().await;
    });

    let recv_conn_id = conn_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<StreamRequest>(text.as_str()) {
                        Ok(StreamRequest::Ping) => {
                            let _ = reply_tx.send(StreamMessage::Pong);
                        }
                        Err(e) => {
                            tracing::warn!(conn_id = %recv_conn_id, "Invalid stream request: {}", e);
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    tracing::warn!("Binary messages not supported");
                }
                Ok(Message::Ping(data)) => {
                    // Axum answers pings automatically
                    tracing::trace!("Received ping: {} bytes", data.len());
                }
                Ok(Message::Pong(_)) => {
                    tracing::trace!("Received pong");
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(conn_id = %recv_conn_id, "Close frame received");
                    break;
                }
                Err(e) => {
                    tracing::warn!(conn_id = %recv_conn_id, "WebSocket error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!(
        conn_id = %conn_id,
        active_subscribers = notifier.subscriber_count(),
        "Change stream disconnected"
    );
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &StreamMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(text) => sender.send(Message::Text(text.into())).await.map_err(|e| {
            tracing::warn!("Failed to send stream message: {}", e);
            e
        }),
        Err(e) => {
            // Stream messages always serialize; skip rather than drop the connection
            tracing::error!("Failed to serialize stream message: {}", e);
            Ok(())
        }
    }
}
