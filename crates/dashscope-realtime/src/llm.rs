//! Chat completion through DashScope's OpenAI-compatible endpoint.

use crate::error::DashScopeError;
use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use mynah_agents::capability::{CapabilityError, ChatModel, ChatRole, ChatTurn};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
const DEFAULT_MODEL: &str = "qwen-plus";

/// Qwen chat completion over the compatible-mode API.
pub struct Chat {
    client: Client<OpenAIConfig>,
    model: String,
}

impl Chat {
    pub fn new(api_key: SecretString) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: SecretString, base_url: impl Into<String>) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key.expose_secret())
            .with_api_base(base_url);
        Self {
            client: Client::with_config(config),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn stream_completion(
        &self,
        turns: &[ChatTurn],
        deltas: &mpsc::Sender<String>,
    ) -> Result<String, DashScopeError> {
        let messages = build_messages(turns)?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .stream(true)
            .build()?;

        let mut stream = self.client.chat().create_stream(request).await?;
        let mut reply = String::new();
        let mut forward = true;
        while let Some(chunk) = stream.next().await {
            let response = chunk?;
            for choice in response.choices {
                if let Some(content) = choice.delta.content {
                    if content.is_empty() {
                        continue;
                    }
                    reply.push_str(&content);
                    if forward && deltas.send(content).await.is_err() {
                        forward = false;
                    }
                }
            }
        }
        debug!(chars = reply.len(), "Completion finished");
        Ok(reply)
    }
}

fn build_messages(
    turns: &[ChatTurn],
) -> Result<Vec<ChatCompletionRequestMessage>, DashScopeError> {
    turns
        .iter()
        .map(|turn| {
            let message = match turn.role {
                ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
                ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
                ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
            };
            Ok(message)
        })
        .collect()
}

#[async_trait]
impl ChatModel for Chat {
    async fn complete(
        &self,
        turns: &[ChatTurn],
        deltas: mpsc::Sender<String>,
    ) -> Result<String, CapabilityError> {
        self.stream_completion(turns, &deltas)
            .await
            .map_err(CapabilityError::from)
    }
}
