//! LLM client
//!
//! Thin chat client over a local Ollama server or any OpenAI-compatible
//! chat-completions endpoint. The rest of the crate only sees the
//! [`ModelPort`] trait; transient failures (connectivity, timeouts, 429/5xx)
//! are distinguished from fatal ones so callers can apply their
//! retry-once policy.

use crate::ports::{ModelError, ModelPort};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const SYSTEM_MESSAGE: &str = "You are a helpful assistant.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Ollama,
    OpenAiCompatible,
}

pub struct LlmClient {
    http: reqwest::Client,
    backend: LlmBackend,
    base_url: String,
    model: String,
    api_key: String,
}

impl LlmClient {
    pub fn new(
        backend: LlmBackend,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            backend,
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    async fn chat(&self, prompt: &str, max_tokens: u32) -> Result<String, ModelError> {
        let (url, body) = match self.backend {
            LlmBackend::Ollama => (
                format!("{}/api/chat", self.base_url),
                json!({
                    "model": self.model,
                    "messages": [
                        {"role": "system", "content": SYSTEM_MESSAGE},
                        {"role": "user", "content": prompt},
                    ],
                    "stream": false,
                    "options": {"num_predict": max_tokens},
                }),
            ),
            LlmBackend::OpenAiCompatible => (
                format!("{}/chat/completions", self.base_url),
                json!({
                    "model": self.model,
                    "messages": [
                        {"role": "system", "content": SYSTEM_MESSAGE},
                        {"role": "user", "content": prompt},
                    ],
                    "temperature": 0.1,
                    "max_tokens": max_tokens,
                }),
            ),
        };

        debug!(url = %url, "calling model");
        let mut request = self.http.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = request.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let message = format!("model endpoint returned {status}");
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(ModelError::Transient(message))
            } else {
                Err(ModelError::Fatal(message))
            };
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::Fatal(format!("unparseable model response: {e}")))?;

        let content = match self.backend {
            LlmBackend::Ollama => payload["message"]["content"].as_str(),
            LlmBackend::OpenAiCompatible => payload["choices"][0]["message"]["content"].as_str(),
        };

        content
            .map(|s| s.to_string())
            .ok_or_else(|| ModelError::Fatal("no content in model response".to_string()))
    }
}

#[async_trait]
impl ModelPort for LlmClient {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ModelError> {
        self.chat(prompt, max_tokens).await
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> ModelError {
    if e.is_timeout() || e.is_connect() {
        ModelError::Transient(e.to_string())
    } else {
        ModelError::Fatal(e.to_string())
    }
}

/// Strip the decorations models wrap around SQL: markdown fences, a leading
/// `sql` tag, stray backticks, one trailing semicolon.
pub fn clean_sql_response(text: &str) -> String {
    let mut s = text.trim().trim_matches('`').trim();
    if let Some(rest) = s.strip_prefix("sql\n").or_else(|| s.strip_prefix("SQL\n")) {
        s = rest;
    }
    s.trim().trim_end_matches(';').trim().to_string()
}

/// Pull the JSON object out of a model reply that may carry narration or
/// fences around it.
pub fn extract_json(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}
