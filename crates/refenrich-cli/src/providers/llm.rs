//! HTTP-backed [`RankCompletion`] over an OpenAI-compatible chat-completion
//! endpoint.

use async_trait::async_trait;
use refenrich_core::ranker::RankCompletion;
use refenrich_core::{Error, LlmApiConfig, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Sends rank requests to a chat-completion endpoint.
pub struct HttpRankCompletion {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpRankCompletion {
    /// Build a completion backend from config, reading the API key from the
    /// environment variable it names.
    pub fn new(config: &LlmApiConfig) -> Result<Self> {
        let client = Client::builder().build().map_err(Error::Network)?;
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl RankCompletion for HttpRankCompletion {
    async fn complete(&self, system_prompt: &str, user_prompt: &str, max_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            max_tokens,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::RankTimeout
                } else {
                    Error::Network(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::RankParseError(format!(
                "rank endpoint returned {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::RankParseError(format!("decode rank response: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::RankParseError("empty choices array".to_string()))
    }
}
