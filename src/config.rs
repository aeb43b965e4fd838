//! Evaluation configuration and provider resolution.
//!
//! Mirrors the layered resolution a CLI would do — an explicit local-model
//! flag wins outright, then each remote backend is tried in a fixed order
//! of preference, then an unauthenticated local model is tried if one is
//! configured, and only then does resolution give up — but stops short of
//! argument parsing or process bootstrapping, which stay outside this
//! library.

use crate::datdp::AssessmentTask;
use crate::error::ConfigError;
use crate::provider::{
    AnthropicProvider, HeuristicsOnlyProvider, LocalProvider, OpenAiStyleProvider, Provider,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
const ENV_OPENROUTER_API_KEY: &str = "OPENROUTER_API_KEY";
const ENV_SYNTHETIC_API_KEY: &str = "SYNTHETIC_API_KEY";
const ENV_MODEL: &str = "MOLTSHIELD_MODEL";
const ENV_VISION_MODEL: &str = "MOLTSHIELD_VISION_MODEL";
const ENV_BLOCK_THRESHOLD: &str = "MOLTSHIELD_BLOCK_THRESHOLD";
const ENV_SKIP_HEURISTICS: &str = "MOLTSHIELD_SKIP_HEURISTICS";
const ENV_USE_CCFC: &str = "MOLTSHIELD_CCFC";
const ENV_PROVIDER_ORDER: &str = "MOLTSHIELD_PROVIDER_ORDER";
const ENV_ALLOW_FALLBACKS: &str = "MOLTSHIELD_ALLOW_FALLBACKS";
const ENV_USE_OPENCLAW_AUTH: &str = "MOLTSHIELD_USE_OPENCLAW_AUTH";
const ENV_HOME: &str = "HOME";

const DEFAULT_REMOTE_ITERATIONS: usize = 5;
const DEFAULT_LOCAL_ITERATIONS: usize = 25;
const DEFAULT_BLOCK_THRESHOLD: f32 = 0.0;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_IMAGE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
const DEFAULT_LOCAL_MODEL: &str = "llama3";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";
const CREDENTIAL_FILE_RELATIVE: &str = ".openclaw/agents/default/auth-profiles.json";

/// Shape of the stored-credential JSON file read from `openclaw_agent_dir`
/// (or its default, `$HOME/.openclaw/agents/default/auth-profiles.json`).
#[derive(Debug, Deserialize)]
struct StoredCredentials {
    #[serde(default)]
    #[allow(dead_code)]
    version: u32,
    profiles: HashMap<String, StoredProfile>,
}

#[derive(Debug, Deserialize)]
struct StoredProfile {
    #[serde(rename = "type")]
    kind: String,
    provider: String,
    key: Option<String>,
    access: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    refresh: Option<String>,
    expires: Option<i64>,
    token: Option<String>,
}

impl StoredProfile {
    /// Whether an `oauth` profile's `expires` (ms epoch) is still in the
    /// future. Non-oauth profiles are never time-limited.
    fn is_expired(&self, now_ms: i64) -> bool {
        self.kind == "oauth" && self.expires.is_some_and(|expires| expires <= now_ms)
    }
}

/// All tunables governing provider selection and evaluation behavior.
#[derive(Debug, Clone, Validate)]
pub struct EvaluationConfig {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub synthetic_api_key: Option<String>,

    pub use_local_model: bool,
    pub ollama_host: Option<String>,
    pub local_model: Option<String>,
    pub local_vision_model: Option<String>,

    pub use_openclaw_auth: bool,
    pub openclaw_agent_dir: Option<PathBuf>,

    pub model: Option<String>,
    pub vision_model: Option<String>,

    #[validate(range(min = 1, max = 64, message = "iterations must be between 1 and 64"))]
    pub iterations: usize,
    pub task: AssessmentTask,

    pub block_threshold: f32,
    pub skip_heuristics: bool,
    pub use_ccfc: bool,

    pub timeout: Duration,
    pub image_timeout: Duration,
    pub no_cache: bool,

    pub provider_order: Vec<String>,
    pub allow_fallbacks: bool,

    pub verbose: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            openai_api_key: None,
            openrouter_api_key: None,
            synthetic_api_key: None,
            use_local_model: false,
            ollama_host: None,
            local_model: None,
            local_vision_model: None,
            use_openclaw_auth: false,
            openclaw_agent_dir: None,
            model: None,
            vision_model: None,
            iterations: DEFAULT_REMOTE_ITERATIONS,
            task: AssessmentTask::Safety1,
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
            skip_heuristics: true,
            use_ccfc: false,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            image_timeout: Duration::from_millis(DEFAULT_IMAGE_TIMEOUT_MS),
            no_cache: false,
            provider_order: Vec::new(),
            allow_fallbacks: true,
            verbose: false,
        }
    }
}

impl EvaluationConfig {
    /// Load from environment variables (via `dotenvy`, so a `.env` file in
    /// the working directory is honored), falling back to defaults for
    /// anything unset. Only the options that name an environment variable
    /// are wired up here; `use_local_model`, `ollama_host`, and the
    /// openclaw-auth directory are construction-time choices, not
    /// env-driven ones.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        config.anthropic_api_key = std::env::var(ENV_ANTHROPIC_API_KEY).ok();
        config.openai_api_key = std::env::var(ENV_OPENAI_API_KEY).ok();
        config.openrouter_api_key = std::env::var(ENV_OPENROUTER_API_KEY).ok();
        config.synthetic_api_key = std::env::var(ENV_SYNTHETIC_API_KEY).ok();
        config.model = std::env::var(ENV_MODEL).ok();
        config.vision_model = std::env::var(ENV_VISION_MODEL).ok();

        if let Ok(raw) = std::env::var(ENV_BLOCK_THRESHOLD) {
            if let Ok(value) = raw.parse() {
                config.block_threshold = value;
            }
        }
        if let Ok(raw) = std::env::var(ENV_SKIP_HEURISTICS) {
            config.skip_heuristics = parse_bool_env(&raw, config.skip_heuristics);
        }
        if let Ok(raw) = std::env::var(ENV_USE_CCFC) {
            config.use_ccfc = parse_bool_env(&raw, config.use_ccfc);
        }
        if let Ok(raw) = std::env::var(ENV_PROVIDER_ORDER) {
            config.provider_order = raw.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(raw) = std::env::var(ENV_ALLOW_FALLBACKS) {
            config.allow_fallbacks = parse_bool_env(&raw, config.allow_fallbacks);
        }
        if let Ok(raw) = std::env::var(ENV_USE_OPENCLAW_AUTH) {
            config.use_openclaw_auth = parse_bool_env(&raw, config.use_openclaw_auth);
        }

        config
    }
}

fn parse_bool_env(raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Default stored-credential path: `$HOME/.openclaw/agents/default/auth-profiles.json`.
fn default_credential_path() -> Option<PathBuf> {
    std::env::var(ENV_HOME)
        .ok()
        .map(|home| Path::new(&home).join(CREDENTIAL_FILE_RELATIVE))
}

/// Reads and parses the stored-credential file, picking the first
/// non-expired `anthropic` profile, preferring `api_key` profiles over
/// `oauth` ones per the resolver's precedence.
fn read_anthropic_credential(path: &Path, now_ms: i64) -> Result<AnthropicProvider, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::CredentialFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let stored: StoredCredentials =
        serde_json::from_str(&contents).map_err(|e| ConfigError::CredentialFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    let mut candidates: Vec<&StoredProfile> = stored
        .profiles
        .values()
        .filter(|profile| profile.provider == "anthropic" && !profile.is_expired(now_ms))
        .collect();
    // api_key profiles before oauth, stable otherwise.
    candidates.sort_by_key(|profile| if profile.kind == "api_key" { 0 } else { 1 });

    let profile = candidates.into_iter().next().ok_or_else(|| {
        ConfigError::CredentialFile {
            path: path.display().to_string(),
            reason: "no usable anthropic profile (none present, or all expired)".to_string(),
        }
    })?;

    match profile.kind.as_str() {
        "api_key" => {
            let key = profile.key.clone().ok_or_else(|| ConfigError::CredentialFile {
                path: path.display().to_string(),
                reason: "api_key profile missing 'key'".to_string(),
            })?;
            Ok(AnthropicProvider::new(key, DEFAULT_ANTHROPIC_MODEL))
        }
        "oauth" => {
            let access = profile.access.clone().ok_or_else(|| ConfigError::CredentialFile {
                path: path.display().to_string(),
                reason: "oauth profile missing 'access'".to_string(),
            })?;
            Ok(AnthropicProvider::with_oauth_token(access, DEFAULT_ANTHROPIC_MODEL))
        }
        "token" => {
            let token = profile.token.clone().ok_or_else(|| ConfigError::CredentialFile {
                path: path.display().to_string(),
                reason: "token profile missing 'token'".to_string(),
            })?;
            Ok(AnthropicProvider::with_oauth_token(token, DEFAULT_ANTHROPIC_MODEL))
        }
        other => Err(ConfigError::CredentialFile {
            path: path.display().to_string(),
            reason: format!("unrecognized credential type '{other}'"),
        }),
    }
}

fn local_provider(config: &EvaluationConfig) -> Arc<dyn Provider> {
    let host = config.ollama_host.as_deref().unwrap_or(DEFAULT_OLLAMA_HOST);
    let model = config.local_model.as_deref().unwrap_or(DEFAULT_LOCAL_MODEL);
    Arc::new(LocalProvider::new(host, model))
}

/// Resolve a [`Provider`] from `config`.
///
/// Precedence, per the resolver contract: explicit local-model flag →
/// Anthropic key → stored credential file (API key before OAuth, OAuth
/// must be non-expired) → Synthetic → OpenRouter → OpenAI → local model
/// if one is configured → [`ConfigError::NoCredentials`]. `now_ms` is the
/// current time as milliseconds since the Unix epoch, threaded in by the
/// caller rather than read from the clock here so credential-expiry
/// decisions stay deterministic and testable.
pub fn resolve_provider_at(
    config: &EvaluationConfig,
    now_ms: i64,
) -> Result<Arc<dyn Provider>, ConfigError> {
    config.validate()?;

    if config.use_local_model {
        return Ok(local_provider(config));
    }

    if let Some(key) = &config.anthropic_api_key {
        let model = config.model.as_deref().unwrap_or(DEFAULT_ANTHROPIC_MODEL);
        return Ok(Arc::new(AnthropicProvider::new(key.clone(), model)));
    }

    if config.use_openclaw_auth {
        let path = config
            .openclaw_agent_dir
            .clone()
            .or_else(default_credential_path);
        if let Some(path) = path {
            if path.exists() {
                return Ok(Arc::new(read_anthropic_credential(&path, now_ms)?));
            }
        }
    }

    if let Some(key) = &config.synthetic_api_key {
        let model = config.model.as_deref().unwrap_or("synthetic-default");
        return Ok(Arc::new(OpenAiStyleProvider::new(
            "synthetic",
            key.clone(),
            model,
            "https://api.synthetic.new/v1",
        )));
    }

    if let Some(key) = &config.openrouter_api_key {
        let model = config.model.as_deref().unwrap_or("openrouter/auto");
        return Ok(Arc::new(OpenAiStyleProvider::new(
            "openrouter",
            key.clone(),
            model,
            "https://openrouter.ai/api/v1",
        )));
    }

    if let Some(key) = &config.openai_api_key {
        let model = config.model.as_deref().unwrap_or("gpt-4o-mini");
        return Ok(Arc::new(OpenAiStyleProvider::new(
            "openai",
            key.clone(),
            model,
            "https://api.openai.com/v1",
        )));
    }

    if config.ollama_host.is_some() {
        return Ok(local_provider(config));
    }

    Err(ConfigError::NoCredentials(
        "no anthropic key, openclaw credential file, synthetic/openrouter/openai key, or local host configured".to_string(),
    ))
}

/// [`resolve_provider_at`] using the number of iterations appropriate to
/// the resolved backend: [`DEFAULT_LOCAL_ITERATIONS`] for a local model,
/// [`DEFAULT_REMOTE_ITERATIONS`] otherwise, unless the caller already set
/// `iterations` explicitly away from the default.
#[must_use]
pub fn default_iterations_for(config: &EvaluationConfig) -> usize {
    if config.iterations != DEFAULT_REMOTE_ITERATIONS {
        return config.iterations;
    }
    if config.use_local_model {
        DEFAULT_LOCAL_ITERATIONS
    } else {
        DEFAULT_REMOTE_ITERATIONS
    }
}

/// [`resolve_provider_at`] using the current wall-clock time for
/// credential-expiry checks. The convenience entry point for callers that
/// don't need deterministic expiry testing.
pub fn resolve_provider(config: &EvaluationConfig) -> Result<Arc<dyn Provider>, ConfigError> {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    resolve_provider_at(config, now_ms)
}

/// [`resolve_provider_at`], converting [`ConfigError::NoCredentials`] into
/// a [`HeuristicsOnlyProvider`] instead of propagating the error — the
/// degraded mode the resolver contract calls "heuristics-only fallback".
/// Other `ConfigError` variants (a misconfigured credential file, a
/// validation failure) still propagate, since those indicate a broken
/// configuration rather than an absent one.
pub fn resolve_provider_with_fallback_at(
    config: &EvaluationConfig,
    now_ms: i64,
) -> Result<Arc<dyn Provider>, ConfigError> {
    match resolve_provider_at(config, now_ms) {
        Ok(provider) => Ok(provider),
        Err(ConfigError::NoCredentials(_)) => Ok(Arc::new(HeuristicsOnlyProvider)),
        Err(other) => Err(other),
    }
}

/// [`resolve_provider_with_fallback_at`] using the current wall-clock time.
pub fn resolve_provider_with_fallback(
    config: &EvaluationConfig,
) -> Result<Arc<dyn Provider>, ConfigError> {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    resolve_provider_with_fallback_at(config, now_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn defaults_are_sane() {
        let config = EvaluationConfig::default();
        assert_eq!(config.iterations, DEFAULT_REMOTE_ITERATIONS);
        assert_eq!(config.block_threshold, 0.0);
        assert!(config.skip_heuristics);
        assert!(!config.use_ccfc);
    }

    #[test]
    fn resolve_rejects_zero_iterations() {
        let config = EvaluationConfig {
            use_local_model: true,
            iterations: 0,
            ..EvaluationConfig::default()
        };
        let result = resolve_provider_at(&config, NOW);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn resolve_without_any_source_fails_with_no_credentials() {
        let config = EvaluationConfig::default();
        let result = resolve_provider_at(&config, NOW);
        assert!(matches!(result, Err(ConfigError::NoCredentials(_))));
    }

    #[test]
    fn fallback_degrades_to_heuristics_only() {
        let config = EvaluationConfig::default();
        let provider = resolve_provider_with_fallback_at(&config, NOW).unwrap();
        assert_eq!(provider.name(), "heuristics-only");
    }

    #[test]
    fn resolve_explicit_local_model_flag_wins_first() {
        let config = EvaluationConfig {
            use_local_model: true,
            anthropic_api_key: Some("sk-ant-test".to_string()),
            ..EvaluationConfig::default()
        };
        let provider = resolve_provider_at(&config, NOW).unwrap();
        assert_eq!(provider.name(), "local");
    }

    #[test]
    fn resolve_prefers_anthropic_key_over_other_remote_keys() {
        let config = EvaluationConfig {
            anthropic_api_key: Some("sk-ant-test".to_string()),
            openai_api_key: Some("sk-oai-test".to_string()),
            ..EvaluationConfig::default()
        };
        let provider = resolve_provider_at(&config, NOW).unwrap();
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn resolve_falls_back_to_configured_local_host_last() {
        let config = EvaluationConfig {
            ollama_host: Some("http://localhost:11434".to_string()),
            ..EvaluationConfig::default()
        };
        let provider = resolve_provider_at(&config, NOW).unwrap();
        assert_eq!(provider.name(), "local");
    }

    #[test]
    fn credential_file_prefers_api_key_over_oauth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth-profiles.json");
        std::fs::write(
            &path,
            r#"{
                "version": 1,
                "profiles": {
                    "a": {"type": "oauth", "provider": "anthropic", "access": "oauth-token", "expires": 9999999999999},
                    "b": {"type": "api_key", "provider": "anthropic", "key": "sk-ant-stored"}
                }
            }"#,
        )
        .unwrap();
        let config = EvaluationConfig {
            use_openclaw_auth: true,
            openclaw_agent_dir: Some(path),
            ..EvaluationConfig::default()
        };
        let provider = resolve_provider_at(&config, NOW).unwrap();
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn credential_file_skips_expired_oauth_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth-profiles.json");
        std::fs::write(
            &path,
            r#"{
                "version": 1,
                "profiles": {
                    "a": {"type": "oauth", "provider": "anthropic", "access": "stale-token", "expires": 1}
                }
            }"#,
        )
        .unwrap();
        let config = EvaluationConfig {
            use_openclaw_auth: true,
            openclaw_agent_dir: Some(path),
            synthetic_api_key: Some("sk-syn-test".to_string()),
            ..EvaluationConfig::default()
        };
        let provider = resolve_provider_at(&config, NOW).unwrap();
        assert_eq!(provider.name(), "synthetic");
    }

    #[test]
    fn credential_file_skips_non_anthropic_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth-profiles.json");
        std::fs::write(
            &path,
            r#"{
                "version": 1,
                "profiles": {
                    "a": {"type": "api_key", "provider": "openai", "key": "sk-oai-stored"}
                }
            }"#,
        )
        .unwrap();
        let config = EvaluationConfig {
            use_openclaw_auth: true,
            openclaw_agent_dir: Some(path),
            openrouter_api_key: Some("sk-or-test".to_string()),
            ..EvaluationConfig::default()
        };
        let provider = resolve_provider_at(&config, NOW).unwrap();
        assert_eq!(provider.name(), "openrouter");
    }

    #[test]
    fn default_iterations_follow_local_vs_remote() {
        let remote = EvaluationConfig::default();
        assert_eq!(default_iterations_for(&remote), DEFAULT_REMOTE_ITERATIONS);

        let local = EvaluationConfig {
            use_local_model: true,
            ..EvaluationConfig::default()
        };
        assert_eq!(default_iterations_for(&local), DEFAULT_LOCAL_ITERATIONS);
    }
}
