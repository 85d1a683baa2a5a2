use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::Completer;

/// Returned whenever the model is unreachable or answers garbage. The
/// engine treats an apologetic line as a perfectly valid utterance.
pub const FALLBACK_UTTERANCE: &str =
    "I can't quite find my words right now — let's talk a little later.";

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

impl LlmClient {
    pub fn new(api_url: String, model: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_url,
            api_key,
            model,
            client,
        }
    }

    /// Generate a completion using the OpenAI API format.
    pub async fn generate(&self, messages: Vec<Message>) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: 0.7,
            max_tokens: 300,
        };

        let mut req = self.client.post(&url).json(&request);
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let response = req.send().await.context("Failed to send LLM request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("LLM API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))
    }

    pub async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.generate(vec![
            Message::system(system_prompt),
            Message::user(user_prompt),
        ])
        .await
    }
}

#[async_trait]
impl Completer for LlmClient {
    /// Never fails: any transport or model error collapses into the
    /// fallback line, logged but absorbed.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> String {
        match self.chat(system_prompt, user_prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!("Completion failed, using fallback: {e:#}");
                FALLBACK_UTTERANCE.to_string()
            }
        }
    }
}
