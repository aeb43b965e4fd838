//! Anthropic Messages API.

use super::{run_with_timeout, shared_client, Provider};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Which header carries the credential: a native API key goes in
/// `x-api-key`, an OAuth access token (detected by the absence of the
/// native key prefix) goes in `Authorization: Bearer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    ApiKey,
    Bearer,
}

/// Talks to Claude models via the Messages API.
pub struct AnthropicProvider {
    credential: String,
    auth_mode: AuthMode,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Construct with a native `x-api-key` credential.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            credential: api_key.into(),
            auth_mode: AuthMode::ApiKey,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: shared_client(),
        }
    }

    /// Construct with an OAuth access token, sent as `Authorization:
    /// Bearer` instead of `x-api-key` — used when the stored-credential
    /// resolution path picks a non-expired `oauth` profile.
    #[must_use]
    pub fn with_oauth_token(token: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            credential: token.into(),
            auth_mode: AuthMode::Bearer,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: shared_client(),
        }
    }

    /// Override the base URL, for Anthropic-compatible proxies.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "max_tokens": 512,
            "system": system_prompt,
            "messages": [{"role": "user", "content": user_prompt}],
        });

        run_with_timeout("anthropic", timeout, async {
            let request = self
                .client
                .post(&self.base_url)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json");
            let request = match self.auth_mode {
                AuthMode::ApiKey => request.header("x-api-key", &self.credential),
                AuthMode::Bearer => {
                    request.header("authorization", format!("Bearer {}", self.credential))
                }
            };
            let response = request
                .json(&body)
                .send()
                .await
                .map_err(|e| ProviderError::Transport {
                    provider: "anthropic".to_string(),
                    message: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                tracing::warn!(provider = "anthropic", status = status.as_u16(), "non-success response");
                return Err(ProviderError::Http {
                    provider: "anthropic".to_string(),
                    status: status.as_u16(),
                    message,
                });
            }

            let parsed: MessagesResponse =
                response.json().await.map_err(|e| ProviderError::Parse {
                    provider: "anthropic".to_string(),
                    message: e.to_string(),
                })?;

            parsed
                .content
                .into_iter()
                .find(|block| block.kind == "text")
                .map(|block| block.text)
                .ok_or_else(|| ProviderError::Parse {
                    provider: "anthropic".to_string(),
                    message: "no text content block in response".to_string(),
                })
        })
        .await
    }
}
