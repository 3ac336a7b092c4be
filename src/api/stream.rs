//! WebSocket stream for push updates between polls.
//!
//! The stream is an optional accelerator: everything it delivers is also
//! observable through polling, so a dead stream degrades latency, never
//! correctness. Reconnects use a short delay first, then back off to a
//! longer one after repeated consecutive failures.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const SHORT_RECONNECT: Duration = Duration::from_secs(5);
const LONG_RECONNECT: Duration = Duration::from_secs(30);
const FAILURES_BEFORE_LONG: u32 = 3;

pub struct StreamClient {
    url: String,
    channels: Vec<Value>,
    tx: mpsc::Sender<Value>,
}

impl StreamClient {
    pub fn new(url: String, tx: mpsc::Sender<Value>) -> Self {
        Self {
            url,
            channels: Vec::new(),
            tx,
        }
    }

    /// Register a user-events subscription, sent on every (re)connect.
    pub fn subscribe_user(&mut self, address: &str) {
        self.channels.push(json!({
            "type": "subscribe",
            "channel": "userEvents",
            "user": address,
        }));
    }

    /// Run until the message channel closes. Never returns an error to
    /// the caller; connectivity problems are retried forever.
    pub async fn run(self) {
        let mut consecutive_failures: u32 = 0;
        loop {
            match self.connect_and_read().await {
                Ok(()) => {
                    // Receiver dropped; the bot is shutting down.
                    return;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    let delay = if consecutive_failures >= FAILURES_BEFORE_LONG {
                        LONG_RECONNECT
                    } else {
                        SHORT_RECONNECT
                    };
                    warn!(
                        error = %e,
                        failures = consecutive_failures,
                        delay_secs = delay.as_secs(),
                        "stream disconnected, reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
            if self.tx.is_closed() {
                return;
            }
            if consecutive_failures >= FAILURES_BEFORE_LONG {
                consecutive_failures = 0;
            }
        }
    }

    async fn connect_and_read(&self) -> std::result::Result<(), String> {
        let (ws, _) = connect_async(&self.url)
            .await
            .map_err(|e| format!("connect failed: {e}"))?;
        info!(url = %self.url, "stream connected");
        let (mut write, mut read) = ws.split();

        for channel in &self.channels {
            let msg = Message::Text(channel.to_string());
            write
                .send(msg)
                .await
                .map_err(|e| format!("subscribe failed: {e}"))?;
        }

        while let Some(frame) = read.next().await {
            let frame = frame.map_err(|e| format!("read failed: {e}"))?;
            match frame {
                Message::Text(text) => {
                    let value: Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => {
                            debug!(error = %e, "discarding malformed stream frame");
                            continue;
                        }
                    };
                    if self.tx.send(value).await.is_err() {
                        return Ok(());
                    }
                }
                Message::Ping(payload) => {
                    write
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| format!("pong failed: {e}"))?;
                }
                Message::Close(_) => {
                    return Err("server closed connection".to_string());
                }
                _ => {}
            }
        }
        Err("stream ended".to_string())
    }
}
