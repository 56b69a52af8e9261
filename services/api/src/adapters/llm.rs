//! services/api/src/adapters/llm.rs
//!
//! The adapter for the generation and chat ports, speaking the OpenAI chat
//! completions protocol. Gemini is reached through its OpenAI-compatible endpoint,
//! so the same client serves both model tiers.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestMessageContentPartImage, ChatCompletionRequestMessageContentPartText,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageDetail, ImageUrl,
        ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use study_companion_core::{
    ports::{ChatService, GenerationService, PortError, PortResult, TextStream},
    ChatSession, ChatTurn, ContentPart, TurnRole,
};
use tracing::{debug, info};

fn unexpected(e: impl std::fmt::Display) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// Message Conversion
//=========================================================================================

/// Builds a user message. Plain text stays a string; anything with images becomes
/// an array of typed parts.
fn user_message(parts: &[ContentPart]) -> PortResult<ChatCompletionRequestMessage> {
    let content = match parts {
        [ContentPart::Text(text)] => ChatCompletionRequestUserMessageContent::Text(text.clone()),
        _ => ChatCompletionRequestUserMessageContent::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text(text) => ChatCompletionRequestUserMessageContentPart::Text(
                        ChatCompletionRequestMessageContentPartText { text: text.clone() },
                    ),
                    ContentPart::Image(image) => {
                        ChatCompletionRequestUserMessageContentPart::ImageUrl(
                            ChatCompletionRequestMessageContentPartImage {
                                image_url: ImageUrl {
                                    url: image.to_data_url(),
                                    detail: Some(ImageDetail::High),
                                },
                            },
                        )
                    }
                })
                .collect(),
        ),
    };
    Ok(ChatCompletionRequestUserMessageArgs::default()
        .content(content)
        .build()
        .map_err(unexpected)?
        .into())
}

fn turn_message(turn: &ChatTurn) -> PortResult<ChatCompletionRequestMessage> {
    match turn.role {
        TurnRole::User => user_message(&turn.parts),
        TurnRole::Model => {
            let text = turn
                .parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text(text) => Some(text.as_str()),
                    ContentPart::Image(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok(ChatCompletionRequestAssistantMessageArgs::default()
                .content(text)
                .build()
                .map_err(unexpected)?
                .into())
        }
    }
}

/// The full conversation for the next turn: persona, history, then the new message.
fn session_messages(
    session: &ChatSession,
    text: &str,
) -> PortResult<Vec<ChatCompletionRequestMessage>> {
    let mut messages = Vec::with_capacity(session.history.len() + 2);
    messages.push(
        ChatCompletionRequestSystemMessageArgs::default()
            .content(session.system_instruction.as_str())
            .build()
            .map_err(unexpected)?
            .into(),
    );
    for turn in &session.history {
        messages.push(turn_message(turn)?);
    }
    messages.push(user_message(&[ContentPart::Text(text.to_string())])?);
    Ok(messages)
}

/// A one-shot request: the document parts followed by the instruction.
fn prompt_messages(
    prompt: &str,
    content: &[ContentPart],
) -> PortResult<Vec<ChatCompletionRequestMessage>> {
    let parts: Vec<ContentPart> = content
        .iter()
        .cloned()
        .chain(std::iter::once(ContentPart::Text(prompt.to_string())))
        .collect();
    Ok(vec![user_message(&parts)?])
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter implementing `GenerationService` and `ChatService` with an
/// OpenAI-compatible chat completions API.
#[derive(Clone)]
pub struct OpenAiStudyAdapter {
    client: Client<OpenAIConfig>,
}

impl OpenAiStudyAdapter {
    pub fn new(client: Client<OpenAIConfig>) -> Self {
        Self { client }
    }

    async fn complete(&self, request: CreateChatCompletionRequest) -> PortResult<String> {
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| PortError::EmptyResponse("no text in the first choice".to_string()))
    }
}

//=========================================================================================
// `GenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl GenerationService for OpenAiStudyAdapter {
    async fn generate_text(
        &self,
        model: &str,
        prompt: &str,
        content: &[ContentPart],
    ) -> PortResult<String> {
        debug!("Generating text with '{}' over {} parts.", model, content.len());
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(prompt_messages(prompt, content)?)
            .n(1)
            .build()
            .map_err(unexpected)?;
        self.complete(request).await
    }

    async fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        content: &[ContentPart],
        schema: &serde_json::Value,
    ) -> PortResult<String> {
        debug!("Generating structured output with '{}'.", model);
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(prompt_messages(prompt, content)?)
            .response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: "structured_output".to_string(),
                    schema: Some(schema.clone()),
                    strict: Some(true),
                },
            })
            .n(1)
            .build()
            .map_err(unexpected)?;
        self.complete(request).await
    }
}

//=========================================================================================
// `ChatService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatService for OpenAiStudyAdapter {
    /// Chat completions are stateless, so a session is just the persona and the
    /// seeded history that every later request replays.
    async fn create_session(
        &self,
        model: &str,
        system_instruction: &str,
        seed_history: Vec<ChatTurn>,
    ) -> PortResult<ChatSession> {
        info!("Opening a chat session on '{}'.", model);
        Ok(ChatSession {
            model: model.to_string(),
            system_instruction: system_instruction.to_string(),
            history: seed_history,
        })
    }

    async fn send_message(&self, session: &ChatSession, text: &str) -> PortResult<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&session.model)
            .messages(session_messages(session, text)?)
            .n(1)
            .build()
            .map_err(unexpected)?;
        self.complete(request).await
    }

    async fn send_message_streaming(
        &self,
        session: &ChatSession,
        text: &str,
    ) -> PortResult<TextStream> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&session.model)
            .messages(session_messages(session, text)?)
            .stream(true)
            .build()
            .map_err(unexpected)?;

        let mut upstream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let stream = try_stream! {
            while let Some(item) = upstream.next().await {
                let response = item.map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;
                for choice in response.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            yield content;
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
