//! Core-Context / Full-Context voting (CCFC).
//!
//! A single DATDP pass over the full conversation can be talked past by
//! burying an injected instruction in a wall of legitimate-looking
//! context. CCFC first asks a judge to extract the shortest actionable
//! "core" instruction, then runs DATDP twice in parallel — once on the
//! core alone, once on a sandwich of core/full/core — and blocks if
//! either track does.

use crate::datdp::{self, AssessmentTask, DatdpConfig, DatdpResult};
use crate::error::MoltError;
use crate::provider::Provider;
use futures_util::future::join;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const BOUNDARY: &str = "\n---\n";

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract the shortest actionable instruction from a block of text. Respond with only that instruction, no preamble or commentary. If there is no actionable instruction, respond with the text unchanged.";

/// Which track(s) of CCFC fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribution {
    Core,
    Cfc,
    Both,
    None,
}

/// Result of a full CCFC pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcfcResult {
    pub core: String,
    pub core_result: DatdpResult,
    pub sandwich_result: DatdpResult,
    pub blocked: bool,
    pub attribution: Attribution,
}

/// Extract the shortest actionable instruction from `content` via the
/// judge model. A provider failure here is fatal to the whole CCFC pass —
/// unlike a single DATDP vote, there's no degraded-but-valid fallback for
/// "we don't know what the core instruction is".
pub async fn extract_core(
    provider: &Arc<dyn Provider>,
    content: &str,
    timeout: Duration,
) -> Result<String, MoltError> {
    provider
        .complete(EXTRACTION_SYSTEM_PROMPT, content, timeout)
        .await
        .map(|text| text.trim().to_string())
        .map_err(|e| MoltError::CcfcExtractionFailed(e.to_string()))
}

fn sandwich(core: &str, full: &str) -> String {
    format!("{core}{BOUNDARY}{full}{BOUNDARY}{core}")
}

/// Run the full CCFC pass: extract the core, then vote on the core and the
/// core/full/core sandwich concurrently.
pub async fn evaluate(
    provider: Arc<dyn Provider>,
    task: &AssessmentTask,
    content: &str,
    iterations: usize,
    block_threshold: f32,
    per_call_timeout: Duration,
) -> Result<CcfcResult, MoltError> {
    let core = extract_core(&provider, content, per_call_timeout).await?;
    let sandwiched = sandwich(&core, content);

    let (core_result, sandwich_result) = join(
        datdp::vote(
            Arc::clone(&provider),
            task,
            &core,
            iterations,
            block_threshold,
            per_call_timeout,
        ),
        datdp::vote(
            Arc::clone(&provider),
            task,
            &sandwiched,
            iterations,
            block_threshold,
            per_call_timeout,
        ),
    )
    .await;

    let core_result = core_result?;
    let sandwich_result = sandwich_result?;

    let attribution = match (core_result.blocked, sandwich_result.blocked) {
        (true, true) => Attribution::Both,
        (true, false) => Attribution::Core,
        (false, true) => Attribution::Cfc,
        (false, false) => Attribution::None,
    };

    Ok(CcfcResult {
        core,
        blocked: core_result.blocked || sandwich_result.blocked,
        core_result,
        sandwich_result,
        attribution,
    })
}

/// [`evaluate`], taking its DATDP tunables as a [`DatdpConfig`] — both
/// tracks share the same configuration.
pub async fn evaluate_with_config(
    provider: Arc<dyn Provider>,
    task: &AssessmentTask,
    content: &str,
    config: &DatdpConfig,
) -> Result<CcfcResult, MoltError> {
    evaluate(
        provider,
        task,
        content,
        config.iterations,
        config.block_threshold,
        config.per_call_timeout,
    )
    .await
}
