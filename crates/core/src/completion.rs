use crate::error::CompletionError;
use crate::models::usable_credential;
use crate::traits::{CompletionModel, CompletionRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "mistralai/mistral-7b-instruct";

/// OpenAI-compatible chat completion client (OpenRouter by default).
pub struct ChatCompletionClient {
    http_client: Client,
    endpoint: String,
    model_name: String,
    api_key: Option<String>,
    system_role: bool,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletionClient {
    pub fn new(
        base_url: &str,
        model_name: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        Ok(Self {
            http_client: Client::builder().timeout(timeout).build()?,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model_name: model_name.to_string(),
            api_key: usable_credential(api_key),
            system_role: true,
        })
    }

    /// Sends the system instruction inside the user turn instead of as a system message.
    pub fn without_system_role(mut self) -> Self {
        self.system_role = false;
        self
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

fn chat_messages(request: &CompletionRequest) -> Vec<ChatMessage<'_>> {
    let mut messages = Vec::with_capacity(2);
    if !request.system.is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: &request.system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &request.user,
    });
    messages
}

fn first_content(response: ChatResponse) -> Result<String, CompletionError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(CompletionError::EmptyResponse)
}

#[async_trait]
impl CompletionModel for ChatCompletionClient {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn supports_system_role(&self) -> bool {
        self.system_role
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CompletionError::MissingCredential)?;

        let body = ChatRequest {
            model: &self.model_name,
            messages: chat_messages(request),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let resp = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionError::Status { status, body });
        }

        let response: ChatResponse = resp.json().await?;
        let content = first_content(response)?;
        debug!(model = %self.model_name, chars = content.len(), "completion received");
        Ok(content)
    }
}
