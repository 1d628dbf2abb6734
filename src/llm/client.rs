//! HTTP client for a chat-completions style model backend

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ChatMessage, TokenSource, TokenStream, tokens_from_sse};
use crate::config::LlmConfig;
use crate::{Error, Result};

const SERVICE: &str = "model backend";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Streams replies from a chat-completions endpoint
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl ChatCompletionsClient {
    /// Create a client from backend configuration
    #[must_use]
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// Send a chat request, failing on non-2xx with the vendor's body as context
    async fn send(
        &self,
        messages: &[ChatMessage],
        session_key: &str,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let request = ChatRequest {
            model: &self.model,
            stream,
            messages,
        };

        let mut builder = self
            .client
            .post(self.endpoint())
            .header("x-session-key", session_key)
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(SERVICE, status, &body));
        }

        Ok(response)
    }
}

#[async_trait]
impl TokenSource for ChatCompletionsClient {
    async fn stream(&self, messages: &[ChatMessage], session_key: &str) -> Result<TokenStream> {
        let response = self.send(messages, session_key, true).await?;
        tracing::debug!(model = %self.model, session_key, "model stream opened");
        Ok(tokens_from_sse(response.bytes_stream()))
    }

    async fn complete(&self, messages: &[ChatMessage], session_key: &str) -> Result<String> {
        let response = self.send(messages, session_key, false).await?;
        let body: ChatResponse = response.json().await?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(Error::EmptyReply)
    }
}
