//! Stand-in backend used when no judge credentials could be resolved.
//!
//! Every call fails immediately with [`ProviderError::Transport`], which
//! strategy leaves that call a provider (DATDP, CCFC, Exchange) already
//! treat as an "unclear" vote or a fail-open outcome rather than an
//! [`crate::error::MoltError`]. A [`StrategyNode::Heuristics`] leaf placed
//! ahead of any judge-backed leaf still runs normally, so a tree built with
//! this provider degrades to heuristics-only scoring instead of refusing
//! to evaluate at all.
//!
//! [`StrategyNode::Heuristics`]: crate::strategy::StrategyNode::Heuristics

use super::Provider;
use crate::error::ProviderError;
use async_trait::async_trait;
use std::time::Duration;

/// Always-fails provider for the heuristics-only fallback path.
pub struct HeuristicsOnlyProvider;

#[async_trait]
impl Provider for HeuristicsOnlyProvider {
    fn name(&self) -> &str {
        "heuristics-only"
    }

    async fn complete(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _timeout: Duration,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::Transport {
            provider: "heuristics-only".to_string(),
            message: "no judge backend configured; heuristics-only fallback active".to_string(),
        })
    }
}
