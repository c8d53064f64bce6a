use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use medidesk_core::config::LlmConfig;
use medidesk_core::domain::conversation::ChatTurn;

/// The generative service consulted when no FAQ answer is close enough.
///
/// `context` is already bounded by the caller and ordered oldest first.
#[async_trait]
pub trait FallbackResponder: Send + Sync {
    fn name(&self) -> &'static str;

    async fn respond(&self, utterance: &str, context: &[ChatTurn]) -> Result<String>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self { role: role.to_string(), content: content.into() }
    }
}

/// System prompt, then each prior turn as a user/assistant pair, then the
/// new utterance.
pub fn build_messages(system_prompt: &str, context: &[ChatTurn], utterance: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(context.len() * 2 + 2);
    messages.push(ChatMessage::new("system", system_prompt));
    for turn in context {
        messages.push(ChatMessage::new("user", turn.user_message.clone()));
        messages.push(ChatMessage::new("assistant", turn.assistant_message.clone()));
    }
    messages.push(ChatMessage::new("user", utterance));
    messages
}

/// OpenAI-compatible `/chat/completions` client. Groq and Ollama expose the
/// same surface, so one client covers every configured provider.
pub struct ChatCompletionsResponder {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    max_retries: u32,
    system_prompt: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

impl ChatCompletionsResponder {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build llm http client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.endpoint()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            system_prompt: config.system_prompt.clone(),
        })
    }

    async fn complete_once(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut request = self.client.post(&self.endpoint).json(&CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.context("chat completion request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("chat completion returned {status}: {body}");
        }

        let parsed: CompletionResponse =
            response.json().await.context("failed to parse chat completion response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            bail!("chat completion returned no content");
        }
        Ok(content)
    }
}

#[async_trait]
impl FallbackResponder for ChatCompletionsResponder {
    fn name(&self) -> &'static str {
        "chat_completions"
    }

    async fn respond(&self, utterance: &str, context: &[ChatTurn]) -> Result<String> {
        let messages = build_messages(&self.system_prompt, context, utterance);
        let mut attempt = 0;
        loop {
            match self.complete_once(&messages).await {
                Ok(reply) => return Ok(reply),
                Err(error) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        event_name = "fallback.retry",
                        attempt,
                        error = %error,
                        "retrying chat completion"
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }
}
