//! Pluggable LLM backends.
//!
//! A [`Provider`] is a capability table, not a class hierarchy: each
//! implementation supplies its own endpoint, headers, request shape, and
//! response parser, and the rest of the crate (DATDP, CCFC, Exchange)
//! talks only to the trait. Dispatch is static — callers hold
//! `Arc<dyn Provider>` and every call carries its own deadline; providers
//! never retry internally, callers decide whether a timeout is worth a
//! second attempt.

mod anthropic;
mod heuristics_only;
mod local;
mod openai_style;

pub use anthropic::AnthropicProvider;
pub use heuristics_only::HeuristicsOnlyProvider;
pub use local::LocalProvider;
pub use openai_style::OpenAiStyleProvider;

use crate::error::ProviderError;
use async_trait::async_trait;
use std::time::Duration;

/// A chat-completion backend, optionally also an embeddings backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used in error messages and traces.
    fn name(&self) -> &str;

    /// Ask the model a single-turn question and return its raw text reply.
    ///
    /// Implementations must respect `timeout` themselves (via
    /// [`tokio::time::timeout`] or the underlying HTTP client's own
    /// deadline) and return [`ProviderError::Timeout`] rather than hang.
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Duration,
    ) -> Result<String, ProviderError>;

    /// Whether [`Provider::embed`] is backed by a real endpoint.
    fn supports_embeddings(&self) -> bool {
        false
    }

    /// Compute an embedding vector for `text`.
    ///
    /// The default implementation always fails; providers that support
    /// embeddings override both this and [`Provider::supports_embeddings`].
    async fn embed(&self, _text: &str, _timeout: Duration) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Transport {
            provider: self.name().to_string(),
            message: "embeddings not supported by this provider".to_string(),
        })
    }
}

pub(crate) fn shared_client() -> reqwest::Client {
    reqwest::Client::builder()
        .build()
        .expect("reqwest client with default TLS config")
}

pub(crate) async fn run_with_timeout<F, T>(
    provider: &str,
    timeout: Duration,
    fut: F,
) -> Result<T, ProviderError>
where
    F: std::future::Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            provider: provider.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
