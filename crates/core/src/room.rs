//! Room Transport
//!
//! The real-time room as seen by a bot session: connect with a credential,
//! observe the connection status, receive chat and speech events, and
//! publish audio back. [`BridgeConnector`] speaks to a WebSocket room bridge;
//! other transports plug in through the same traits.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, info, warn};

// Inbound events a slow session may fall behind by before the oldest are
// dropped.
const EVENT_CHANNEL_CAPACITY: usize = 256;
const OUTBOUND_CHANNEL_CAPACITY: usize = 128;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Inbound activity from room participants.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// A chat message posted to the room.
    ChatReceived {
        sender: Option<String>,
        message: String,
    },
    /// One segmented user utterance.
    SpeechReceived {
        sender: Option<String>,
        audio: Bytes,
    },
}

/// Opens a room connection. A single attempt; no retries.
#[async_trait]
pub trait RoomConnector: Send + Sync {
    async fn connect(&self, url: &str, token: &str) -> Result<Arc<dyn RoomConnection>>;
}

/// A live room connection.
#[async_trait]
pub trait RoomConnection: Send + Sync {
    fn connection_state(&self) -> ConnectionState;

    /// Registers a new listener for inbound events. Dropping the receiver
    /// removes the registration.
    fn subscribe(&self) -> broadcast::Receiver<RoomEvent>;

    async fn publish_audio(&self, audio: Bytes) -> Result<()>;

    /// Drops any audio queued for playback.
    async fn clear_audio(&self);

    async fn disconnect(&self);
}

// --- WebSocket Bridge ---

/// Frames exchanged with the room bridge as JSON text.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeFrame {
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        message: String,
    },
    ClearAudio,
}

/// Connects to a WebSocket room bridge at `<url>?access_token=<token>`.
#[derive(Debug, Default, Clone)]
pub struct BridgeConnector;

#[async_trait]
impl RoomConnector for BridgeConnector {
    async fn connect(&self, url: &str, token: &str) -> Result<Arc<dyn RoomConnection>> {
        let separator = if url.contains('?') { '&' } else { '?' };
        let endpoint = format!("{}{}access_token={}", url, separator, token);

        let (ws_stream, _) = connect_async(endpoint)
            .await
            .context("Failed to connect to room bridge")?;
        let (mut sink, mut stream) = ws_stream.split();
        info!(url, "Connected to room bridge");

        let connected = Arc::new(AtomicBool::new(true));
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(OUTBOUND_CHANNEL_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let closing = matches!(msg, WsMessage::Close(_));
                if let Err(e) = sink.send(msg).await {
                    warn!(error = %e, "Failed to write to room bridge");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader = {
            let connected = connected.clone();
            let events_tx = events_tx.clone();
            tokio::spawn(async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(WsMessage::Text(text)) => match serde_json::from_str(&text) {
                            Ok(BridgeFrame::Chat { sender, message }) => {
                                let _ = events_tx.send(RoomEvent::ChatReceived { sender, message });
                            }
                            Ok(other) => debug!(frame = ?other, "Ignoring bridge frame"),
                            Err(e) => warn!(error = %e, "Unparseable bridge frame"),
                        },
                        Ok(WsMessage::Binary(audio)) => {
                            let _ = events_tx.send(RoomEvent::SpeechReceived {
                                sender: None,
                                audio,
                            });
                        }
                        Ok(WsMessage::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "Room bridge read failed");
                            break;
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
                info!("Room bridge connection closed");
            })
        };

        Ok(Arc::new(BridgeConnection {
            connected,
            events_tx,
            outbound_tx,
            tasks: Mutex::new(BridgeTasks {
                reader: Some(reader),
                writer: Some(writer),
            }),
        }))
    }
}

struct BridgeConnection {
    connected: Arc<AtomicBool>,
    events_tx: broadcast::Sender<RoomEvent>,
    outbound_tx: mpsc::Sender<WsMessage>,
    tasks: Mutex<BridgeTasks>,
}

struct BridgeTasks {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl BridgeConnection {
    async fn send_frame(&self, frame: &BridgeFrame) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.outbound_tx
            .send(WsMessage::Text(text.into()))
            .await
            .context("Room bridge writer has stopped")
    }
}

#[async_trait]
impl RoomConnection for BridgeConnection {
    fn connection_state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events_tx.subscribe()
    }

    async fn publish_audio(&self, audio: Bytes) -> Result<()> {
        self.outbound_tx
            .send(WsMessage::Binary(audio))
            .await
            .context("Room bridge writer has stopped")
    }

    async fn clear_audio(&self) {
        if let Err(e) = self.send_frame(&BridgeFrame::ClearAudio).await {
            debug!(error = %e, "Could not clear room audio");
        }
    }

    async fn disconnect(&self) {
        let mut tasks = self.tasks.lock().await;
        if let Some(reader) = tasks.reader.take() {
            reader.abort();
        }
        if let Some(writer) = tasks.writer.take() {
            let _ = self.outbound_tx.send(WsMessage::Close(None)).await;
            if tokio::time::timeout(CLOSE_TIMEOUT, writer).await.is_err() {
                debug!("Room bridge did not acknowledge close in time");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_frame_wire_format() {
        let frame: BridgeFrame =
            serde_json::from_value(json!({ "type": "chat", "sender": "pochita", "message": "hi" }))
                .unwrap();
        assert_eq!(
            frame,
            BridgeFrame::Chat {
                sender: Some("pochita".to_string()),
                message: "hi".to_string()
            }
        );

        let frame: BridgeFrame =
            serde_json::from_value(json!({ "type": "chat", "message": "hi" })).unwrap();
        assert_eq!(
            frame,
            BridgeFrame::Chat {
                sender: None,
                message: "hi".to_string()
            }
        );
    }

    #[test]
    fn test_clear_audio_frame_wire_format() {
        assert_eq!(
            serde_json::to_value(BridgeFrame::ClearAudio).unwrap(),
            json!({ "type": "clear_audio" })
        );
    }

    #[test]
    fn test_connection_state_wire_names() {
        assert_eq!(
            serde_json::to_value(ConnectionState::Connected).unwrap(),
            json!("connected")
        );
        assert_eq!(
            serde_json::to_value(ConnectionState::Disconnected).unwrap(),
            json!("disconnected")
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let result = BridgeConnector
            .connect("ws://127.0.0.1:1/rtc", "token")
            .await;
        assert!(result.is_err());
    }
}
