//! OpenAI-backed [`RewriteService`] implementation.
//!
//! A thin chat-completions client: one POST per call, no streaming, and no
//! retry layer — the orchestrator treats every rewrite call as
//! non-idempotent, so a failed call surfaces immediately as
//! [`ServiceError`] and the caller decides what to do.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{RewriteResponse, RewriteService, ServiceError};

const PROVIDER: &str = "openai";
const API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Chat-completions client configured for deterministic document work.
#[derive(Debug)]
pub struct OpenAiRewrite {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout_secs: u64,
}

impl OpenAiRewrite {
    /// Build a client for `model` with the given per-call timeout.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: Option<u32>,
        timeout_secs: u64,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::Transport {
                provider: PROVIDER.into(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            temperature,
            max_tokens,
            timeout_secs,
        })
    }

    /// Read the API key from `OPENAI_API_KEY`.
    pub fn from_env(
        model: impl Into<String>,
        temperature: f32,
        max_tokens: Option<u32>,
        timeout_secs: u64,
    ) -> Result<Self, ServiceError> {
        let key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ServiceError::NotConfigured {
                provider: PROVIDER.into(),
                hint: "set OPENAI_API_KEY in the environment".into(),
            })?;
        Self::new(key, model, temperature, max_tokens, timeout_secs)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl RewriteService for OpenAiRewrite {
    async fn rewrite(&self, system: &str, user: &str) -> Result<RewriteResponse, ServiceError> {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        if let Some(max) = self.max_tokens {
            body["max_completion_tokens"] = json!(max);
        }

        let result = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(ServiceError::Timeout {
                    provider: PROVIDER.into(),
                    secs: self.timeout_secs,
                })
            }
            Err(e) => {
                return Err(ServiceError::Transport {
                    provider: PROVIDER.into(),
                    message: e.to_string(),
                })
            }
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ServiceError::ApiError {
                provider: PROVIDER.into(),
                message: format!("HTTP {status}: {detail}"),
            });
        }

        let parsed: ChatResponse =
            response.json().await.map_err(|e| ServiceError::Transport {
                provider: PROVIDER.into(),
                message: format!("malformed response body: {e}"),
            })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ServiceError::ApiError {
                provider: PROVIDER.into(),
                message: "response contained no choices".into(),
            })?;

        debug!(
            prompt_tokens = parsed.usage.prompt_tokens,
            completion_tokens = parsed.usage.completion_tokens,
            "rewrite call complete"
        );

        Ok(RewriteResponse {
            content,
            prompt_tokens: parsed.usage.prompt_tokens,
            completion_tokens: parsed.usage.completion_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_without_key_is_not_configured() {
        // Guard against a key leaking in from the test environment.
        if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
            return;
        }
        let err = OpenAiRewrite::from_env("gpt-4o", 0.2, None, 30).unwrap_err();
        assert!(matches!(err, ServiceError::NotConfigured { .. }));
    }
}
