//! OpenAI-compatible chat-completions backends (OpenAI itself, OpenRouter,
//! Synthetic, and any other provider that speaks the same wire format).

use super::{run_with_timeout, shared_client, Provider};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Generic OpenAI-style chat-completions client.
///
/// The base URL determines the backend: `https://api.openai.com/v1` for
/// OpenAI, `https://openrouter.ai/api/v1` for OpenRouter, or a
/// Synthetic-compatible endpoint. All three agree on the request/response
/// shape closely enough to share one implementation.
pub struct OpenAiStyleProvider {
    name: &'static str,
    api_key: String,
    model: String,
    base_url: String,
    embedding_model: Option<String>,
    client: reqwest::Client,
}

impl OpenAiStyleProvider {
    #[must_use]
    pub fn new(
        name: &'static str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
            embedding_model: None,
            client: shared_client(),
        }
    }

    /// Enable [`Provider::embed`] by naming an embedding-capable model.
    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Provider for OpenAiStyleProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": 0,
        });

        run_with_timeout(self.name, timeout, async {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| ProviderError::Transport {
                    provider: self.name.to_string(),
                    message: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(ProviderError::Http {
                    provider: self.name.to_string(),
                    status: status.as_u16(),
                    message,
                });
            }

            let parsed: ChatResponse = response.json().await.map_err(|e| ProviderError::Parse {
                provider: self.name.to_string(),
                message: e.to_string(),
            })?;

            parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| ProviderError::Parse {
                    provider: self.name.to_string(),
                    message: "no choices in response".to_string(),
                })
        })
        .await
    }

    fn supports_embeddings(&self) -> bool {
        self.embedding_model.is_some()
    }

    async fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>, ProviderError> {
        let Some(embedding_model) = &self.embedding_model else {
            return Err(ProviderError::Transport {
                provider: self.name.to_string(),
                message: "no embedding model configured".to_string(),
            });
        };
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = json!({ "model": embedding_model, "input": text });

        run_with_timeout(self.name, timeout, async {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| ProviderError::Transport {
                    provider: self.name.to_string(),
                    message: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(ProviderError::Http {
                    provider: self.name.to_string(),
                    status: status.as_u16(),
                    message,
                });
            }

            let parsed: EmbeddingResponse =
                response.json().await.map_err(|e| ProviderError::Parse {
                    provider: self.name.to_string(),
                    message: e.to_string(),
                })?;

            parsed
                .data
                .into_iter()
                .next()
                .map(|d| d.embedding)
                .ok_or_else(|| ProviderError::Parse {
                    provider: self.name.to_string(),
                    message: "no embedding data in response".to_string(),
                })
        })
        .await
    }
}
