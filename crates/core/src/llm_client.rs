use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Who said a line of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    Student,
    Tutor,
}

/// One line of conversation passed to the completion call as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn student(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Student,
            content: content.into(),
        }
    }

    pub fn tutor(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tutor,
            content: content.into(),
        }
    }
}

/// The generative completion function: `(system directive, context) -> text`.
///
/// Output is assumed non-deterministic and occasionally malformed; every caller
/// in this crate validates it before use.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system_directive: String, context: Vec<ChatMessage>)
    -> Result<String>;
}

/// An implementation of `CompletionClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The specific model identifier to use for chat completions (e.g., "gpt-4o").
    /// * `timeout` - Upper bound on a single completion call.
    pub fn new(config: OpenAIConfig, model: String, timeout: Duration) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            timeout,
        }
    }

    fn build_messages(
        system_directive: String,
        context: Vec<ChatMessage>,
    ) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_directive)
                .build()?
                .into(),
        ];
        for msg in context {
            match msg.role {
                ChatRole::Student => messages.push(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(msg.content)
                        .build()?
                        .into(),
                ),
                ChatRole::Tutor => messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(msg.content)
                        .build()?
                        .into(),
                ),
            };
        }
        Ok(messages)
    }
}

#[async_trait]
impl CompletionClient for OpenAICompatibleClient {
    async fn complete(
        &self,
        system_directive: String,
        context: Vec<ChatMessage>,
    ) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::build_messages(system_directive, context)?)
            .build()?;

        debug!(model = %self.model, "Requesting completion");
        let response: CreateChatCompletionResponse =
            tokio::time::timeout(self.timeout, self.client.chat().create(request))
                .await
                .map_err(|_| anyhow!("completion timed out after {:?}", self.timeout))??;

        let content = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .clone()
            .context("No content in LLM response")?;

        Ok(content)
    }
}
