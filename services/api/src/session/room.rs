//! Room Session
//!
//! One bot engagement with one room, driven through
//! `Connecting -> Active -> Closing -> Closed` (or `Failed` when the single
//! connection attempt does not succeed). While active, the session feeds
//! chat messages and transcribed speech to its conversation controller one
//! at a time, greets the room once after a settling delay, and polls the
//! room's connection status at a fixed interval.
//!
//! Inbound events are buffered by the room. A session that falls further
//! behind than that buffer loses the oldest unhandled events: the loss is
//! logged with the number skipped and the remaining events are still
//! handled in arrival order.

use crate::providers::ProviderFactory;
use maakima_core::{
    conversation::{ConversationController, ConversationEvent},
    room::{ConnectionState, RoomConnection, RoomConnector, RoomEvent},
    speech::SpeechToText,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, watch},
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const DEFAULT_GREETING: &str = "Hi there! How can I help?";

/// Floor for the status poll period; `interval` rejects a zero period.
const MIN_STATUS_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
    Failed,
}

/// Settings shared by every session the manager spawns.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub transport_url: String,
    pub system_prompt: Arc<String>,
    pub greeting: String,
    pub greeting_delay: Duration,
    pub status_poll_interval: Duration,
}

/// What happened over a session's lifetime.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub room_name: String,
    pub transitions: Vec<SessionState>,
}

impl SessionReport {
    pub fn final_state(&self) -> Option<SessionState> {
        self.transitions.last().copied()
    }
}

pub struct RoomSession {
    id: Uuid,
    room_name: String,
    token: String,
    settings: SessionSettings,
    connector: Arc<dyn RoomConnector>,
    providers: Arc<dyn ProviderFactory>,
    state_tx: watch::Sender<SessionState>,
    transitions: Vec<SessionState>,
}

impl RoomSession {
    /// Creates a session in the `Connecting` state. The returned receiver
    /// follows the session's state.
    pub fn new(
        id: Uuid,
        room_name: impl Into<String>,
        token: String,
        settings: SessionSettings,
        connector: Arc<dyn RoomConnector>,
        providers: Arc<dyn ProviderFactory>,
    ) -> (Self, watch::Receiver<SessionState>) {
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let session = Self {
            id,
            room_name: room_name.into(),
            token,
            settings,
            connector,
            providers,
            state_tx,
            transitions: vec![SessionState::Connecting],
        };
        (session, state_rx)
    }

    fn transition(&mut self, state: SessionState) {
        info!(?state, "Session state changed");
        self.transitions.push(state);
        self.state_tx.send_replace(state);
    }

    fn report(self) -> SessionReport {
        SessionReport {
            session_id: self.id,
            room_name: self.room_name,
            transitions: self.transitions,
        }
    }

    /// Runs the session to completion and releases everything it owns.
    pub async fn run(mut self) -> SessionReport {
        let room = match self
            .connector
            .connect(&self.settings.transport_url, &self.token)
            .await
        {
            Ok(room) => room,
            Err(e) => {
                error!(error = ?e, "Failed to connect to room");
                self.transition(SessionState::Failed);
                return self.report();
            }
        };
        info!(room = %self.room_name, "Bot connected to room");

        let stt = self.providers.speech_to_text();
        let speech = self.providers.speech_output(room.clone());
        let mut controller = ConversationController::new(
            self.settings.system_prompt.as_str(),
            self.providers.llm(),
            self.providers.dispatcher(),
            speech,
        );
        let mut room_events = room.subscribe();
        let mut conversation_events = controller.subscribe();
        self.transition(SessionState::Active);

        self.converse(
            room.as_ref(),
            stt.as_ref(),
            &mut controller,
            &mut room_events,
            &mut conversation_events,
        )
        .await;

        self.transition(SessionState::Closing);
        controller.shutdown().await;
        stt.close().await;
        drop(room_events);
        drop(conversation_events);
        room.disconnect().await;
        self.transition(SessionState::Closed);
        self.report()
    }

    /// The active-state event loop. Returns once the room is no longer
    /// connected.
    async fn converse(
        &self,
        room: &dyn RoomConnection,
        stt: &dyn SpeechToText,
        controller: &mut ConversationController,
        room_events: &mut broadcast::Receiver<RoomEvent>,
        conversation_events: &mut broadcast::Receiver<ConversationEvent>,
    ) {
        let greeting_delay = tokio::time::sleep(self.settings.greeting_delay);
        tokio::pin!(greeting_delay);
        let mut greeted = false;
        let mut room_events_open = true;

        let mut status = tokio::time::interval(
            self.settings
                .status_poll_interval
                .max(MIN_STATUS_POLL_INTERVAL),
        );
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut greeting_delay, if !greeted => {
                    greeted = true;
                    controller.say(&self.settings.greeting).await;
                }
                event = room_events.recv(), if room_events_open => match event {
                    Ok(event) => self.handle_room_event(event, stt, controller).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Room events dropped; session fell behind the room buffer");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Room event source closed");
                        room_events_open = false;
                    }
                },
                Ok(event) = conversation_events.recv() => log_conversation_event(&event),
                _ = status.tick() => {
                    let state = room.connection_state();
                    if state != ConnectionState::Connected {
                        info!(?state, "Room is no longer connected");
                        break;
                    }
                }
            }
        }
    }

    /// Handles one inbound event. Failures are logged and the session goes
    /// on waiting for the next event.
    async fn handle_room_event(
        &self,
        event: RoomEvent,
        stt: &dyn SpeechToText,
        controller: &mut ConversationController,
    ) {
        let text = match event {
            RoomEvent::ChatReceived { sender, message } => {
                debug!(?sender, "Chat message received");
                message
            }
            RoomEvent::SpeechReceived { sender, audio } => {
                debug!(?sender, bytes = audio.len(), "Speech received");
                match stt.transcribe(audio).await {
                    Ok(transcript) => transcript,
                    Err(e) => {
                        error!(error = ?e, "Speech recognition failed");
                        return;
                    }
                }
            }
        };

        if text.trim().is_empty() {
            return;
        }
        if let Err(e) = controller.handle_inbound_text(&text).await {
            error!(error = ?e, "Turn failed");
        }
    }
}

fn log_conversation_event(event: &ConversationEvent) {
    match event {
        ConversationEvent::FunctionCallsFinished { calls, results } => {
            for (call, result) in calls.iter().zip(results) {
                let recipient = call.arguments.get("recipient_email").and_then(Value::as_str);
                info!(
                    function = %call.name,
                    recipient = ?recipient,
                    is_error = result.is_error,
                    "Function call finished"
                );
            }
        }
    }
}
