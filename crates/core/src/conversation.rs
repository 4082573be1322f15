//! Conversation Controller
//!
//! Drives one session's turns: append the user's text, ask the model,
//! dispatch any function calls it requests, and speak the final reply.
//! Playback runs in its own task so the next inbound turn can interrupt it.

use crate::{
    functions::{FunctionCallRequest, FunctionCallResult, FunctionDispatcher, FunctionSpec},
    history::ConversationHistory,
    llm_client::{LLMAction, LLMClient, LLMStreamEvent},
    speech::SpeechOutput,
};
use anyhow::Result;
use futures::StreamExt;
use std::sync::Arc;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Notifications published by the controller.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// All calls requested in one turn have completed.
    FunctionCallsFinished {
        calls: Vec<FunctionCallRequest>,
        results: Vec<FunctionCallResult>,
    },
}

struct Playback {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ConversationController {
    history: ConversationHistory,
    llm: Arc<dyn LLMClient>,
    dispatcher: FunctionDispatcher,
    functions: Vec<FunctionSpec>,
    speech: Arc<dyn SpeechOutput>,
    playback: Option<Playback>,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationController {
    pub fn new(
        system_prompt: impl Into<String>,
        llm: Arc<dyn LLMClient>,
        dispatcher: FunctionDispatcher,
        speech: Arc<dyn SpeechOutput>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let functions = dispatcher.specs().cloned().collect();
        Self {
            history: ConversationHistory::new(system_prompt),
            llm,
            dispatcher,
            functions,
            speech,
            playback: None,
            events,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    /// Whether a reply is still being played back.
    pub fn is_speaking(&self) -> bool {
        self.playback
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished())
    }

    /// Speaks `text` without consulting the model and records it as an
    /// assistant message. Used for the greeting.
    pub async fn say(&mut self, text: &str) {
        self.interrupt().await;
        self.history.push_assistant(text);
        self.start_playback(text.to_string());
    }

    /// Runs one turn for an inbound user text.
    ///
    /// Any reply still playing is stopped before the model is consulted.
    /// Function calls always run to completion and their results are
    /// appended to the history, even if the reply is later interrupted.
    pub async fn handle_inbound_text(&mut self, text: &str) -> Result<()> {
        self.interrupt().await;
        self.history.push_user(text);

        let action = self
            .llm
            .decide_action(self.history.messages(), &self.functions)
            .await?;

        let reply = match action {
            LLMAction::TextResponse(reply) => reply,
            LLMAction::FunctionCalls(calls) => {
                self.run_function_calls(calls).await;

                let mut stream = self.llm.stream_after_tools(self.history.messages()).await?;
                let mut reply = String::new();
                while let Some(event) = stream.next().await {
                    match event {
                        Ok(LLMStreamEvent::TextChunk(chunk)) => reply.push_str(&chunk),
                        Err(e) => {
                            warn!(error = %e, "Response stream ended early");
                            break;
                        }
                    }
                }
                reply
            }
        };

        if reply.trim().is_empty() {
            warn!("Model produced an empty reply; nothing to speak");
            return Ok(());
        }

        self.history.push_assistant(reply.clone());
        self.start_playback(reply);
        Ok(())
    }

    async fn run_function_calls(&mut self, calls: Vec<FunctionCallRequest>) {
        info!(count = calls.len(), "Model requested function calls");
        self.history.push_function_calls(calls.clone());

        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            let result = self.dispatcher.invoke(call).await;
            self.history.push_function_result(&result);
            results.push(result);
        }

        let _ = self
            .events
            .send(ConversationEvent::FunctionCallsFinished { calls, results });
    }

    fn start_playback(&mut self, text: String) {
        let cancel = CancellationToken::new();
        let speech = self.speech.clone();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("Playback cancelled"),
                result = speech.speak(&text) => {
                    if let Err(e) = result {
                        error!(error = ?e, "Speech playback failed");
                    }
                }
            }
        });
        self.playback = Some(Playback { cancel, handle });
    }

    /// Stops the in-flight reply, if any. Returns once playback has ended.
    pub async fn interrupt(&mut self) {
        let Some(playback) = self.playback.take() else {
            return;
        };
        if !playback.handle.is_finished() {
            info!("Interrupting in-flight reply");
            playback.cancel.cancel();
            self.speech.cancel().await;
        }
        if let Err(e) = playback.handle.await {
            warn!(error = %e, "Playback task ended abnormally");
        }
    }

    /// Stops playback ahead of teardown.
    pub async fn shutdown(&mut self) {
        self.interrupt().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        email::{EmailError, EmailGateway, OutgoingEmail},
        functions::INVALID_EMAIL_REPLY,
        history::{ChatMessage, Role},
        llm_client::LLMStream,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::{collections::VecDeque, sync::Mutex as StdMutex};
    use tokio::sync::{Notify, mpsc};

    /// Replays scripted actions and records the history seen on each call.
    #[derive(Default)]
    struct ScriptedLlm {
        actions: StdMutex<VecDeque<LLMAction>>,
        final_replies: StdMutex<VecDeque<String>>,
        seen: StdMutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedLlm {
        fn new(actions: Vec<LLMAction>, final_replies: Vec<&str>) -> Self {
            Self {
                actions: StdMutex::new(actions.into()),
                final_replies: StdMutex::new(final_replies.into_iter().map(String::from).collect()),
                seen: StdMutex::new(Vec::new()),
            }
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
                .ok_or_else(|| anyhow::anyhow!("model unavailable"))
        }

        async fn stream_after_tools(&self, history: &[ChatMessage]) -> Result<LLMStream> {
            self.seen.lock().unwrap().push(history.to_vec());
            let reply = self
                .final_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            let chunks: Vec<Result<LLMStreamEvent>> = reply
                .split_inclusive(' ')
                .map(|c| Ok(LLMStreamEvent::TextChunk(c.to_string())))
                .collect();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    /// Speech output whose playback lasts until cancelled or released.
    struct RecordingSpeech {
        log: StdMutex<Vec<String>>,
        started: mpsc::UnboundedSender<String>,
        release: Notify,
        hold: bool,
    }

    impl RecordingSpeech {
        fn new(hold: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (started, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    log: StdMutex::new(Vec::new()),
                    started,
                    release: Notify::new(),
                    hold,
                }),
                rx,
            )
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SpeechOutput for RecordingSpeech {
        async fn speak(&self, text: &str) -> Result<()> {
            self.log.lock().unwrap().push(format!("speak:{}", text));
            let _ = self.started.send(text.to_string());
            if self.hold {
                self.release.notified().await;
            }
            Ok(())
        }

        async fn cancel(&self) {
            self.log.lock().unwrap().push("cancel".to_string());
        }
    }

    struct CountingGateway {
        sends: StdMutex<usize>,
    }

    impl EmailGateway for CountingGateway {
        fn send(&self, _email: &OutgoingEmail) -> Result<(), EmailError> {
            *self.sends.lock().unwrap() += 1;
            Ok(())
        }

        fn fetch_latest_subjects(&self, _count: usize) -> Result<Vec<String>, EmailError> {
            Ok(vec!["A".to_string(), "B".to_string(), "C".to_string()])
        }
    }

    fn controller(
        llm: Arc<ScriptedLlm>,
        speech: Arc<RecordingSpeech>,
        gateway: Arc<CountingGateway>,
    ) -> ConversationController {
        ConversationController::new(
            "You are Maakima.",
            llm,
            FunctionDispatcher::email_assistant(gateway, "bot@example.com".to_string()),
            speech,
        )
    }

    fn gateway() -> Arc<CountingGateway> {
        Arc::new(CountingGateway {
            sends: StdMutex::new(0),
        })
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> FunctionCallRequest {
        FunctionCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_text_turn_submits_full_history_and_speaks() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![LLMAction::TextResponse("Hello pochita.".to_string())],
            vec![],
        ));
        let (speech, mut started) = RecordingSpeech::new(false);
        let mut ctl = controller(llm.clone(), speech.clone(), gateway());

        ctl.handle_inbound_text("Maakima, are you there?").await.unwrap();
        assert_eq!(started.recv().await.unwrap(), "Hello pochita.");

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0].role, Role::System);
        assert_eq!(seen[0][1].content, "Maakima, are you there?");

        let history = ctl.history().messages();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].role, Role::Assistant);
        assert_eq!(history[2].content, "Hello pochita.");
    }

    #[tokio::test]
    async fn test_second_inbound_text_interrupts_playback() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![
                LLMAction::TextResponse("first reply".to_string()),
                LLMAction::TextResponse("second reply".to_string()),
            ],
            vec![],
        ));
        let (speech, mut started) = RecordingSpeech::new(true);
        let mut ctl = controller(llm, speech.clone(), gateway());

        ctl.handle_inbound_text("one").await.unwrap();
        assert_eq!(started.recv().await.unwrap(), "first reply");
        assert!(ctl.is_speaking());

        ctl.handle_inbound_text("two").await.unwrap();
        assert_eq!(started.recv().await.unwrap(), "second reply");

        assert_eq!(
            speech.entries(),
            vec!["speak:first reply", "cancel", "speak:second reply"]
        );
    }

    #[tokio::test]
    async fn test_finished_playback_is_not_cancelled() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![
                LLMAction::TextResponse("first".to_string()),
                LLMAction::TextResponse("second".to_string()),
            ],
            vec![],
        ));
        let (speech, mut started) = RecordingSpeech::new(false);
        let mut ctl = controller(llm, speech.clone(), gateway());

        ctl.handle_inbound_text("one").await.unwrap();
        started.recv().await.unwrap();
        while ctl.is_speaking() {
            tokio::task::yield_now().await;
        }
        ctl.handle_inbound_text("two").await.unwrap();
        started.recv().await.unwrap();

        assert!(!speech.entries().contains(&"cancel".to_string()));
    }

    #[tokio::test]
    async fn test_function_results_follow_requests_in_history() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![LLMAction::FunctionCalls(vec![
                call("c1", "read_latest_email_subjects", json!({ "count": 10 })),
                call(
                    "c2",
                    "send_email",
                    json!({
                        "recipient_email": "not-an-email",
                        "subject": "hi",
                        "message_body": "hello"
                    }),
                ),
            ])],
            vec!["You have three emails and that address looks wrong."],
        ));
        let (speech, mut started) = RecordingSpeech::new(false);
        let gw = gateway();
        let mut ctl = controller(llm.clone(), speech, gw.clone());
        let mut events = ctl.subscribe();

        let before = ctl.history().len();
        ctl.handle_inbound_text("check my mail").await.unwrap();
        started.recv().await.unwrap();

        let history = ctl.history().messages();
        // user + one batched request entry + two results + final reply
        assert_eq!(history.len(), before + 5);
        let request_entry = &history[before + 1];
        assert_eq!(request_entry.tool_calls.len(), 2);
        assert_eq!(history[before + 2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(
            history[before + 2].content,
            "Latest email subjects: A, B, C"
        );
        assert_eq!(history[before + 3].tool_call_id.as_deref(), Some("c2"));
        assert_eq!(history[before + 3].content, INVALID_EMAIL_REPLY);
        assert_eq!(
            history[before + 4].content,
            "You have three emails and that address looks wrong."
        );
        assert_eq!(*gw.sends.lock().unwrap(), 0);

        // The final response request saw the function results.
        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen[1].len(), before + 4);

        match events.recv().await.unwrap() {
            ConversationEvent::FunctionCallsFinished { calls, results } => {
                assert_eq!(calls.len(), 2);
                assert_eq!(results.len(), 2);
            }
        }
    }

    #[tokio::test]
    async fn test_model_failure_keeps_user_message_and_returns_error() {
        let llm = Arc::new(ScriptedLlm::new(vec![], vec![]));
        let (speech, _started) = RecordingSpeech::new(false);
        let mut ctl = controller(llm, speech.clone(), gateway());

        assert!(ctl.handle_inbound_text("hello?").await.is_err());
        assert_eq!(ctl.history().len(), 2);
        assert!(speech.entries().is_empty());
    }

    #[tokio::test]
    async fn test_say_records_greeting() {
        let llm = Arc::new(ScriptedLlm::new(vec![], vec![]));
        let (speech, mut started) = RecordingSpeech::new(false);
        let mut ctl = controller(llm, speech, gateway());

        ctl.say("Hi there! How can I help?").await;
        assert_eq!(started.recv().await.unwrap(), "Hi there! How can I help?");
        assert_eq!(ctl.history().last().unwrap().role, Role::Assistant);
    }
}
