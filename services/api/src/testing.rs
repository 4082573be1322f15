//! In-memory stand-ins for the room, providers and signer.

use crate::{
    credentials::{CredentialError, TokenSigner},
    providers::ProviderFactory,
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use maakima_core::{
    email::{EmailError, EmailGateway, OutgoingEmail},
    functions::{FunctionDispatcher, FunctionSpec},
    history::ChatMessage,
    llm_client::{LLMAction, LLMClient, LLMStream, LLMStreamEvent},
    room::{ConnectionState, RoomConnection, RoomConnector, RoomEvent},
    speech::{SpeechOutput, SpeechToText},
};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::broadcast;

// --- Room ---

pub struct FakeRoom {
    state: Mutex<ConnectionState>,
    events: broadcast::Sender<RoomEvent>,
    disconnects: AtomicUsize,
}

impl FakeRoom {
    fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(ConnectionState::Connected),
            events,
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn emit_chat(&self, message: &str) {
        let _ = self.events.send(RoomEvent::ChatReceived {
            sender: Some("alice".to_string()),
            message: message.to_string(),
        });
    }

    pub fn emit_speech(&self, audio: &'static [u8]) {
        let _ = self.events.send(RoomEvent::SpeechReceived {
            sender: Some("alice".to_string()),
            audio: Bytes::from_static(audio),
        });
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomConnection for FakeRoom {
    fn connection_state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    async fn publish_audio(&self, _audio: Bytes) -> Result<()> {
        Ok(())
    }

    async fn clear_audio(&self) {}

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Hands out a fresh `FakeRoom` per successful connect.
pub struct FakeConnector {
    fail: bool,
    attempts: AtomicUsize,
    tokens: Mutex<Vec<String>>,
    rooms: Mutex<Vec<Arc<FakeRoom>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            fail: false,
            attempts: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
            rooms: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Credentials presented on each connect, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    pub fn room(&self, index: usize) -> Arc<FakeRoom> {
        self.rooms.lock().unwrap()[index].clone()
    }

    pub fn rooms(&self) -> Vec<Arc<FakeRoom>> {
        self.rooms.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoomConnector for FakeConnector {
    async fn connect(&self, _url: &str, token: &str) -> Result<Arc<dyn RoomConnection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(token.to_string());
        if self.fail {
            return Err(anyhow!("connection refused"));
        }
        let room = Arc::new(FakeRoom::new());
        self.rooms.lock().unwrap().push(room.clone());
        Ok(room)
    }
}

// --- Providers ---

/// Replays scripted decisions; fails once the script runs out.
pub struct ScriptedLlm {
    actions: Mutex<VecDeque<LLMAction>>,
    final_replies: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    /// Number of model requests made so far.
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last_history(&self) -> Vec<ChatMessage> {
        self.seen.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LLMClient for ScriptedLlm {
    async fn decide_action(
        &self,
        history: &[ChatMessage],
        _functions: &[FunctionSpec],
    ) -> Result<LLMAction> {
        self.seen.lock().unwrap().push(history.to_vec());
        self.actions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("model unavailable"))
    }

    async fn stream_after_tools(&self, history: &[ChatMessage]) -> Result<LLMStream> {
        self.seen.lock().unwrap().push(history.to_vec());
        let reply = self
            .final_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let chunks = vec![Ok(LLMStreamEvent::TextChunk(reply))];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[derive(Default)]
pub struct RecordingSpeech {
    log: Mutex<Vec<String>>,
}

impl RecordingSpeech {
    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechOutput for RecordingSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        self.log.lock().unwrap().push(format!("speak:{}", text));
        Ok(())
    }

    async fn cancel(&self) {}
}

#[derive(Default)]
pub struct FakeStt {
    closes: AtomicUsize,
}

impl FakeStt {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechToText for FakeStt {
    async fn transcribe(&self, _audio: Bytes) -> Result<String> {
        Ok("transcribed speech".to_string())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingGateway {
    pub fn sends(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl EmailGateway for RecordingGateway {
    fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }

    fn fetch_latest_subjects(&self, _count: usize) -> Result<Vec<String>, EmailError> {
        Ok(vec!["Welcome".to_string()])
    }
}

/// Every session built from this factory shares the same fakes so tests can
/// inspect them afterwards.
pub struct FakeProviders {
    pub llm: Arc<ScriptedLlm>,
    pub speech: Arc<RecordingSpeech>,
    pub stt: Arc<FakeStt>,
    pub gateway: Arc<RecordingGateway>,
}

impl FakeProviders {
    pub fn new(actions: Vec<LLMAction>) -> Self {
        Self {
            llm: Arc::new(ScriptedLlm {
                actions: Mutex::new(actions.into()),
                final_replies: Mutex::new(VecDeque::new()),
                seen: Mutex::new(Vec::new()),
            }),
            speech: Arc::new(RecordingSpeech::default()),
            stt: Arc::new(FakeStt::default()),
            gateway: Arc::new(RecordingGateway::default()),
        }
    }

    pub fn push_final_reply(&self, reply: &str) {
        self.llm
            .final_replies
            .lock()
            .unwrap()
            .push_back(reply.to_string());
    }
}

impl ProviderFactory for FakeProviders {
    fn speech_to_text(&self) -> Arc<dyn SpeechToText> {
        self.stt.clone()
    }

    fn speech_output(&self, _room: Arc<dyn RoomConnection>) -> Arc<dyn SpeechOutput> {
        self.speech.clone()
    }

    fn llm(&self) -> Arc<dyn LLMClient> {
        self.llm.clone()
    }

    fn dispatcher(&self) -> FunctionDispatcher {
        FunctionDispatcher::email_assistant(self.gateway.clone(), "bot@example.com".to_string())
    }
}

// --- Credentials ---

pub struct FakeSigner {
    pub fail: bool,
}

impl TokenSigner for FakeSigner {
    fn room_token(&self, room_name: &str) -> Result<String, CredentialError> {
        if self.fail {
            return Err(CredentialError::Config("no signing key".to_string()));
        }
        Ok(format!("token-for-{}", room_name))
    }
}
