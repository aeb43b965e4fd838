//! Local, unauthenticated model servers (Ollama and compatible).

use super::{run_with_timeout, shared_client, Provider};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Ollama's `/api/generate` endpoint. No API key; reachability is the
/// failure mode ([`crate::error::ConfigError::LocalServerUnreachable`]),
/// not authorization.
pub struct LocalProvider {
    model: String,
    host: String,
    client: reqwest::Client,
}

impl LocalProvider {
    #[must_use]
    pub fn new(host: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            host: host.into(),
            client: shared_client(),
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/api/generate", self.host.trim_end_matches('/'));
        let prompt = format!("{system_prompt}\n\n{user_prompt}");
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        run_with_timeout("local", timeout, async {
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| ProviderError::Transport {
                    provider: "local".to_string(),
                    message: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(ProviderError::Http {
                    provider: "local".to_string(),
                    status: status.as_u16(),
                    message,
                });
            }

            let parsed: GenerateResponse =
                response.json().await.map_err(|e| ProviderError::Parse {
                    provider: "local".to_string(),
                    message: e.to_string(),
                })?;

            Ok(parsed.response)
        })
        .await
    }
}
