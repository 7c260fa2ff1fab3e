//! WebSocket change feed.

use std::time::Duration;

use backon::ExponentialBackoff;
use futures::{SinkExt, StreamExt};
use kvsync_engine::{StreamMessage, StreamRequest};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{ChangeFeed, FeedItem};
use crate::config::SyncConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Change feed over the server's `/api/stream` WebSocket.
///
/// Reconnects with exponential backoff and jitter whenever the connection
/// drops or goes silent for longer than the heartbeat timeout. After half
/// the timeout without traffic it probes the server with a ping.
pub struct WsFeed {
    url: Url,
    heartbeat_timeout: Duration,
    backoff: ExponentialBackoff,
    config: SyncConfig,
    stream: Option<WsStream>,
    /// A connection existed before, so reconnects wait out the backoff
    reconnecting: bool,
    /// A ping was sent and nothing has arrived since
    probing: bool,
}

impl WsFeed {
    pub fn new(url: Url, config: &SyncConfig) -> Self {
        Self {
            url,
            heartbeat_timeout: config.heartbeat_timeout,
            backoff: config.reconnect_backoff(),
            config: config.clone(),
            stream: None,
            reconnecting: false,
            probing: false,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn next_delay(&mut self) -> Duration {
        self.backoff.next().unwrap_or(self.config.retry_max_delay)
    }

    fn drop_connection(&mut self, reason: String) -> FeedItem {
        tracing::warn!(url = %self.url, "Change stream lost: {}", reason);
        self.stream = None;
        self.reconnecting = true;
        self.probing = false;
        FeedItem::Lost(reason)
    }

    async fn probe(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        let ping = match serde_json::to_string(&StreamRequest::Ping) {
            Ok(ping) => ping,
            Err(_) => return false,
        };
        stream.send(Message::Text(ping.into())).await.is_ok()
    }
}

impl ChangeFeed for WsFeed {
    async fn next(&mut self) -> FeedItem {
        loop {
            if self.stream.is_none() {
                if self.reconnecting {
                    let delay = self.next_delay();
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                    tokio::time::sleep(delay).await;
                }

                match connect_async(self.url.as_str()).await {
                    Ok((stream, _)) => {
                        tracing::info!(url = %self.url, "Change stream connected");
                        self.stream = Some(stream);
                        self.backoff = self.config.reconnect_backoff();
                        self.probing = false;
                        return FeedItem::Connected;
                    }
                    Err(e) => {
                        tracing::warn!(url = %self.url, "Change stream connect failed: {}", e);
                        self.reconnecting = true;
                        continue;
                    }
                }
            }

            let Some(stream) = self.stream.as_mut() else {
                continue;
            };

            let frame = match tokio::time::timeout(self.heartbeat_timeout / 2, stream.next()).await {
                Ok(frame) => frame,
                Err(_) if !self.probing => {
                    self.probing = true;
                    if !self.probe().await {
                        return self.drop_connection("failed to send ping".to_string());
                    }
                    continue;
                }
                Err(_) => {
                    return self.drop_connection(format!(
                        "no traffic within {:?}",
                        self.heartbeat_timeout
                    ));
                }
            };

            self.probing = false;

            match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<StreamMessage>(text.as_str()) {
                        Ok(message) => {
                            if let Some(event) = message.into_event() {
                                return FeedItem::Change(event);
                            }
                            // hello, heartbeat, pong
                        }
                        Err(e) => {
                            tracing::warn!("Invalid stream message: {}", e);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    return self.drop_connection("closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return self.drop_connection(e.to_string()),
                None => return self.drop_connection("stream ended".to_string()),
            }
        }
    }
}
