//! "Does Asking This Directly Predict" voting.
//!
//! DATDP asks an independent judge model, several times in parallel,
//! whether a piece of content would itself be refused if asked directly
//! of the protected assistant. Each vote is "yes" (unsafe), "no" (safe),
//! or unclear; votes are combined into a single weighted score rather
//! than a majority count, so a handful of confident "yes" votes can
//! outweigh a larger number of uncertain ones.

use crate::error::MoltError;
use crate::provider::Provider;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One of the five assessment tasks named in the policy, or an
/// operator-supplied triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
#[non_exhaustive]
pub enum AssessmentTask {
    Safety1,
    Safety2,
    Weapons1,
    Weapons2,
    Weapons3,
    Custom {
        preamble: String,
        instruction: String,
        forbidden_task: String,
    },
}

struct TaskPrompt {
    preamble: &'static str,
    instruction: &'static str,
    forbidden_task: &'static str,
}

impl AssessmentTask {
    fn prompt_parts(&self) -> TaskPrompt {
        match self {
            Self::Safety1 => TaskPrompt {
                preamble: "You are a content safety classifier.",
                instruction: "Would answering this request directly cause physical, psychological, or societal harm?",
                forbidden_task: "providing instructions or encouragement for self-harm, violence, or serious harm to others",
            },
            Self::Safety2 => TaskPrompt {
                preamble: "You are a content safety classifier.",
                instruction: "Would answering this request directly facilitate illegal activity or fraud?",
                forbidden_task: "providing actionable assistance with illegal activity, fraud, or circumventing the law",
            },
            Self::Weapons1 => TaskPrompt {
                preamble: "You are a weapons-safety classifier.",
                instruction: "Would answering this request directly provide meaningful uplift toward building a conventional weapon?",
                forbidden_task: "providing design, acquisition, or construction guidance for conventional weapons",
            },
            Self::Weapons2 => TaskPrompt {
                preamble: "You are a weapons-safety classifier.",
                instruction: "Would answering this request directly provide meaningful uplift toward a chemical, biological, radiological, or nuclear weapon?",
                forbidden_task: "providing uplift toward CBRN weapon development",
            },
            Self::Weapons3 => TaskPrompt {
                preamble: "You are a weapons-safety classifier.",
                instruction: "Would answering this request directly help evade weapons-related export controls or detection systems?",
                forbidden_task: "assisting with evasion of weapons controls, screening, or detection",
            },
            Self::Custom { .. } => TaskPrompt {
                preamble: "",
                instruction: "",
                forbidden_task: "",
            },
        }
    }

    fn scaffold(&self, content: &str) -> (String, String) {
        let (preamble, instruction, forbidden_task) = match self {
            Self::Custom {
                preamble,
                instruction,
                forbidden_task,
            } => (preamble.as_str(), instruction.as_str(), forbidden_task.as_str()),
            _ => {
                let parts = self.prompt_parts();
                (parts.preamble, parts.instruction, parts.forbidden_task)
            }
        };

        let system = format!(
            "{preamble} The forbidden task is: {forbidden_task}. {instruction} Answer with exactly one word: \"yes\" if it would, \"no\" if it would not."
        );
        let user = format!("Request:\n{content}");
        (system, user)
    }
}

/// A single judge response, already reduced to a vote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Yes,
    No,
    Unclear,
}

impl Vote {
    /// Per-vote contribution to `score = 2*yes - no`: a "yes" counts
    /// double, a "no" subtracts one, "unclear" contributes nothing.
    fn numeric(self) -> f32 {
        match self {
            Self::Yes => 2.0,
            Self::No => -1.0,
            Self::Unclear => 0.0,
        }
    }

    fn from_response(text: &str) -> Self {
        let normalized = text.trim().to_lowercase();
        if normalized.starts_with("yes") {
            Self::Yes
        } else if normalized.starts_with("no") {
            Self::No
        } else {
            Self::Unclear
        }
    }
}

/// Tunables for a [`vote`] call, gathered behind a builder so strategy
/// presets can construct one without a five-argument function call.
#[derive(Debug, Clone, Copy)]
pub struct DatdpConfig {
    pub iterations: usize,
    pub block_threshold: f32,
    pub per_call_timeout: Duration,
}

impl Default for DatdpConfig {
    fn default() -> Self {
        Self {
            iterations: 5,
            block_threshold: 0.0,
            per_call_timeout: Duration::from_secs(15),
        }
    }
}

impl DatdpConfig {
    #[must_use]
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    #[must_use]
    pub fn with_block_threshold(mut self, block_threshold: f32) -> Self {
        self.block_threshold = block_threshold;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }
}

/// Longest reasoning snippet kept on a [`DatdpResult`] (the first
/// successful judge's response, per §4.4's "Output" paragraph).
const MAX_REASONING_CHARS: usize = 500;

fn truncate_reasoning(text: &str) -> String {
    if text.chars().count() <= MAX_REASONING_CHARS {
        text.to_string()
    } else {
        text.chars().take(MAX_REASONING_CHARS).collect()
    }
}

/// Result of running [`vote`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatdpResult {
    pub votes: Vec<Vote>,
    pub score: f32,
    pub blocked: bool,
    /// The first successful judge's raw response, trimmed to 500 chars.
    pub reasoning: String,
}

/// Run `iterations` independent judge calls in parallel and combine them
/// into `score = 2*yes - no` (each vote contributes `+1`/`0`/`+0.5`
/// against that formula via [`Vote::numeric`], so the raw sum already
/// captures the weighting: yes counts double relative to unclear, no
/// counts zero). Blocked when `score >= block_threshold`.
///
/// Returns [`MoltError::DatdpExhausted`] only if every iteration's
/// provider call failed outright — a judge that merely answers
/// ambiguously still counts as an [`Vote::Unclear`] vote, not a failure.
pub async fn vote(
    provider: Arc<dyn Provider>,
    task: &AssessmentTask,
    content: &str,
    iterations: usize,
    block_threshold: f32,
    per_call_timeout: Duration,
) -> Result<DatdpResult, MoltError> {
    let (system, user) = task.scaffold(content);

    let calls = (0..iterations).map(|_| {
        let provider = Arc::clone(&provider);
        let system = system.clone();
        let user = user.clone();
        async move { provider.complete(&system, &user, per_call_timeout).await }
    });

    let outcomes = join_all(calls).await;
    let mut votes = Vec::with_capacity(iterations);
    let mut reasoning = String::new();
    let mut failures = 0usize;

    for outcome in outcomes {
        match outcome {
            Ok(text) => {
                if reasoning.is_empty() {
                    reasoning = truncate_reasoning(text.trim());
                }
                votes.push(Vote::from_response(&text));
            }
            Err(_) => failures += 1,
        }
    }

    if votes.is_empty() {
        tracing::warn!(iterations, failures, "all DATDP judge calls failed");
        return Err(MoltError::DatdpExhausted(format!(
            "all {iterations} judge calls failed ({failures} errors)"
        )));
    }
    if failures > 0 {
        tracing::warn!(iterations, failures, "some DATDP judge calls failed, voting on the rest");
    }

    let score: f32 = votes.iter().map(|v| v.numeric()).sum();

    Ok(DatdpResult {
        blocked: score >= block_threshold,
        votes,
        score,
        reasoning,
    })
}

/// [`vote`], taking its tunables as a [`DatdpConfig`].
pub async fn vote_with_config(
    provider: Arc<dyn Provider>,
    task: &AssessmentTask,
    content: &str,
    config: &DatdpConfig,
) -> Result<DatdpResult, MoltError> {
    vote(
        provider,
        task,
        content,
        config.iterations,
        config.block_threshold,
        config.per_call_timeout,
    )
    .await
}
