//! Crate-wide error types.
//!
//! Most components absorb per-call failures locally (a failed DATDP judge
//! call becomes an "unclear" vote, not an `Err`; a failed Exchange LLM call
//! fails open). [`MoltError`] is reserved for the few paths in the pipeline
//! that must actually surface a failure upward: total DATDP/CCFC failure,
//! a non-degradable strategy leaf, and provider/config resolution.

use thiserror::Error;

/// Failure from a provider's transport or upstream API.
///
/// Distinct from a judge giving a nonsensical answer (that's a
/// [`ParseError`](MoltError::ParseError) / unclear vote, not a transport
/// failure).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The HTTP call did not complete within its deadline.
    #[error("provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Provider identifier.
        provider: String,
        /// Configured deadline.
        timeout_ms: u64,
    },

    /// The upstream returned a non-2xx status.
    #[error("provider '{provider}' returned status {status}: {message}")]
    Http {
        /// Provider identifier.
        provider: String,
        /// HTTP status code, if the response was received at all.
        status: u16,
        /// Upstream error body or reqwest error text.
        message: String,
    },

    /// The request could not even be sent (DNS, TLS, connection refused).
    #[error("provider '{provider}' transport error: {message}")]
    Transport {
        /// Provider identifier.
        provider: String,
        /// Underlying transport error text.
        message: String,
    },

    /// The response body did not match the shape this provider expects.
    #[error("provider '{provider}' returned an unparseable response: {message}")]
    Parse {
        /// Provider identifier.
        provider: String,
        /// What went wrong.
        message: String,
    },
}

/// Failure resolving a working provider from an [`crate::config::EvaluationConfig`].
///
/// [`crate::config::resolve_provider_with_fallback`] converts
/// [`ConfigError::NoCredentials`] into a heuristics-only provider rather
/// than propagating it; every other variant (a malformed credential file,
/// a validation failure) indicates a broken configuration rather than an
/// absent one and still propagates from both resolvers.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No usable credentials were found for any configured backend.
    #[error("no credentials available: {0}")]
    NoCredentials(String),

    /// A local model server was configured but is unreachable.
    #[error("local model server at {host} is unreachable: {reason}")]
    LocalServerUnreachable {
        /// Configured host.
        host: String,
        /// Probe failure reason.
        reason: String,
    },

    /// The stored credential file could not be read or parsed.
    #[error("credential file {path} unusable: {reason}")]
    CredentialFile {
        /// Path that was attempted.
        path: String,
        /// Why it failed.
        reason: String,
    },

    /// `EvaluationConfig` failed field-level validation.
    #[error(transparent)]
    Validation(#[from] validator::ValidationErrors),
}

/// Errors that must propagate rather than be absorbed.
#[derive(Debug, Error)]
pub enum MoltError {
    /// Every judge iteration in a DATDP vote failed.
    #[error("DATDP voting failed entirely: {0}")]
    DatdpExhausted(String),

    /// Core extraction for CCFC failed (not just one DATDP track).
    #[error("CCFC core extraction failed: {0}")]
    CcfcExtractionFailed(String),

    /// A non-degradable strategy leaf returned an error.
    #[error("strategy node '{node}' failed: {source}")]
    StrategyNodeFailed {
        /// Node identifier (e.g. `"datdp"`, `"ccfc"`).
        node: String,
        /// Underlying provider error.
        #[source]
        source: ProviderError,
    },

    /// Provider/config resolution failed with something other than
    /// [`ConfigError::NoCredentials`] — callers that want the
    /// heuristics-only degradation for an absent credential should resolve
    /// via [`crate::config::resolve_provider_with_fallback`] before this
    /// variant is ever constructed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
