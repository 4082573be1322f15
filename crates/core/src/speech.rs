//! Speech capabilities: recognition of user utterances and synthesis of
//! assistant replies into the room.

use crate::room::RoomConnection;
use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateSpeechRequestArgs, SpeechModel, SpeechResponseFormat, Voice},
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Turns one segmented user utterance into text.
///
/// Implementations may hold a network client; `close` releases it and is
/// called once when the owning session shuts down.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: Bytes) -> Result<String>;

    async fn close(&self);
}

/// Synthesises text and plays it into the room.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Resolves once playback of `text` has been handed to the room.
    async fn speak(&self, text: &str) -> Result<()>;

    /// Stops playback that is in flight. Called on interruption.
    async fn cancel(&self);
}

// --- Deepgram Speech-to-Text ---

const DEEPGRAM_LISTEN_URL: &str = "https://api.deepgram.com/v1/listen";

#[derive(Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Deepgram pre-recorded transcription over HTTP.
///
/// Each session owns its own instance, and therefore its own HTTP client.
pub struct DeepgramStt {
    api_key: String,
    model: String,
    http: Mutex<Option<reqwest::Client>>,
}

impl DeepgramStt {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "nova-2".to_string(),
            http: Mutex::new(Some(reqwest::Client::new())),
        }
    }
}

#[async_trait]
impl SpeechToText for DeepgramStt {
    async fn transcribe(&self, audio: Bytes) -> Result<String> {
        let client = self
            .http
            .lock()
            .await
            .clone()
            .context("Speech recognizer has been closed")?;

        let response = client
            .post(DEEPGRAM_LISTEN_URL)
            .query(&[("model", self.model.as_str()), ("smart_format", "true")])
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .context("Failed to reach Deepgram")?
            .error_for_status()?;

        let body: DeepgramResponse = response.json().await?;
        let transcript = body
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default();
        debug!(chars = transcript.len(), "Received transcript");
        Ok(transcript)
    }

    async fn close(&self) {
        if self.http.lock().await.take().is_some() {
            info!("Speech recognizer HTTP client closed");
        }
    }
}

// --- OpenAI Text-to-Speech ---

/// OpenAI speech synthesis, published sentence by sentence as raw PCM into
/// the room.
pub struct OpenAiSpeech {
    client: Client<OpenAIConfig>,
    model: SpeechModel,
    voice: Voice,
    room: Arc<dyn RoomConnection>,
}

impl OpenAiSpeech {
    pub fn new(
        config: OpenAIConfig,
        model: &str,
        voice: &str,
        room: Arc<dyn RoomConnection>,
    ) -> Self {
        Self {
            client: Client::with_config(config),
            model: parse_speech_model(model),
            voice: parse_voice(voice),
            room,
        }
    }
}

#[async_trait]
impl SpeechOutput for OpenAiSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        for sentence in split_sentences(text) {
            let request = CreateSpeechRequestArgs::default()
                .input(sentence)
                .model(self.model.clone())
                .voice(self.voice.clone())
                .response_format(SpeechResponseFormat::Pcm)
                .build()?;
            let audio = self
                .client
                .audio()
                .speech(request)
                .await
                .map_err(|e| anyhow!("Speech synthesis failed: {}", e))?;
            self.room.publish_audio(audio.bytes).await?;
        }
        Ok(())
    }

    async fn cancel(&self) {
        self.room.clear_audio().await;
    }
}

fn parse_speech_model(model: &str) -> SpeechModel {
    match model {
        "tts-1" => SpeechModel::Tts1,
        "tts-1-hd" => SpeechModel::Tts1Hd,
        other => SpeechModel::Other(other.to_string()),
    }
}

fn parse_voice(voice: &str) -> Voice {
    match voice.to_lowercase().as_str() {
        "alloy" => Voice::Alloy,
        "echo" => Voice::Echo,
        "fable" => Voice::Fable,
        "onyx" => Voice::Onyx,
        "nova" => Voice::Nova,
        "shimmer" => Voice::Shimmer,
        _ => Voice::Sage,
    }
}

/// Splits text into sentences on `.`, `!` or `?` followed by whitespace.
/// Terminal punctuation stays with its sentence; blank pieces are dropped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    let end = i + c.len_utf8();
                    let sentence = text[start..end].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = end;
                }
            }
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}
