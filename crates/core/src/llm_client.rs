use crate::{
    functions::{FunctionCallRequest, FunctionSpec},
    history::{ChatMessage, Role},
};
use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, FunctionCall,
        FunctionObjectArgs,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;

/// Represents the events that can be yielded from a streaming text response.
#[derive(Debug, Clone)]
pub enum LLMStreamEvent {
    TextChunk(String),
}

/// A stream of text chunks from the LLM.
pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMStreamEvent>> + Send>>;

/// Represents the two possible outcomes of the LLM's initial decision-making turn.
#[derive(Debug, Clone, PartialEq)]
pub enum LLMAction {
    /// The LLM decided to respond directly with text.
    TextResponse(String),
    /// The LLM decided to call one or more functions.
    FunctionCalls(Vec<FunctionCallRequest>),
}

/// The language-model capability used by a conversation.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Makes a single, non-streaming call with the full history, offering
    /// `functions` for the model to call.
    async fn decide_action(
        &self,
        history: &[ChatMessage],
        functions: &[FunctionSpec],
    ) -> Result<LLMAction>;

    /// Makes a streaming call after function results have been appended to
    /// the history. No functions are offered.
    async fn stream_after_tools(&self, history: &[ChatMessage]) -> Result<LLMStream>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The chat model identifier (e.g., "gpt-4o-mini").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn decide_action(
        &self,
        history: &[ChatMessage],
        functions: &[FunctionSpec],
    ) -> Result<LLMAction> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(to_request_messages(history)?);
        if !functions.is_empty() {
            args.tools(to_tools(functions)?).tool_choice("auto");
        }
        let request = args.build()?;

        let response: CreateChatCompletionResponse = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .first()
            .context("No response choice from LLM")?;

        match (&choice.message.tool_calls, &choice.message.content) {
            (Some(tool_calls), _) if !tool_calls.is_empty() => Ok(LLMAction::FunctionCalls(
                tool_calls.iter().map(to_function_call).collect(),
            )),
            (_, Some(content)) => Ok(LLMAction::TextResponse(content.clone())),
            _ => Err(anyhow!(
                "LLM response had neither text content nor tool calls."
            )),
        }
    }

    async fn stream_after_tools(&self, history: &[ChatMessage]) -> Result<LLMStream> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(to_request_messages(history)?)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(request).await?;

        Ok(Box::pin(stream.filter_map(|result| async {
            match result {
                Ok(response) => {
                    let content = response.choices.first()?.delta.content.clone()?;
                    if content.is_empty() {
                        None
                    } else {
                        Some(Ok(LLMStreamEvent::TextChunk(content)))
                    }
                }
                Err(e) => Some(Err(e.into())),
            }
        })))
    }
}

/// Maps the conversation history onto chat-completion request messages.
pub fn to_request_messages(history: &[ChatMessage]) -> Result<Vec<ChatCompletionRequestMessage>> {
    history
        .iter()
        .map(|msg| {
            let message: ChatCompletionRequestMessage = match msg.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
                Role::Assistant if !msg.tool_calls.is_empty() => {
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .tool_calls(
                            msg.tool_calls
                                .iter()
                                .map(|call| ChatCompletionMessageToolCall {
                                    id: call.id.clone(),
                                    r#type: ChatCompletionToolType::Function,
                                    function: FunctionCall {
                                        name: call.name.clone(),
                                        arguments: call.arguments.to_string(),
                                    },
                                })
                                .collect::<Vec<_>>(),
                        )
                        .build()?
                        .into()
                }
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
                Role::Tool => ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(msg.tool_call_id.clone().unwrap_or_default())
                    .content(msg.content.clone())
                    .build()?
                    .into(),
            };
            Ok(message)
        })
        .collect()
}

fn to_tools(functions: &[FunctionSpec]) -> Result<Vec<ChatCompletionTool>> {
    functions
        .iter()
        .map(|spec| {
            Ok(ChatCompletionToolArgs::default()
                .function(
                    FunctionObjectArgs::default()
                        .name(spec.name)
                        .description(spec.description)
                        .parameters(spec.parameters_schema())
                        .build()?,
                )
                .build()?)
        })
        .collect()
}

/// Arguments that are not valid JSON are kept as a raw string so the
/// dispatcher can report them back to the model.
fn to_function_call(call: &ChatCompletionMessageToolCall) -> FunctionCallRequest {
    let arguments = serde_json::from_str(&call.function.arguments)
        .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
    FunctionCallRequest {
        id: call.id.clone(),
        name: call.function.name.clone(),
        arguments,
    }
}
