//! Encoding-normalization engine.
//!
//! Recovers a plausible plaintext when one or more reversible
//! transformations hide instruction-like text: base64, base32-ish runs,
//! hex, URL-encoding, HTML entities, unicode escapes, ROT13, reversal,
//! zero-width steganography, and homoglyph substitution. [`detect_encodings`]
//! is the public entry point; it runs a bounded BFS over decode paths and
//! returns the most "readable" endpoint reached (§4.1).
//!
//! Detectors and the BFS driver never lengthen content — decoded spans
//! strictly replace the encoded spans they were found at — and the engine
//! is idempotent: re-running it on its own output reports no encoding.

mod detectors;
mod search;
mod speculative;

use serde::{Deserialize, Serialize};

pub use detectors::{likely_has_encoding, shannon_entropy};
pub use search::recursive_decode;

/// Below this length the BFS always runs (ROT13 has no textual marker to
/// gate on); above it, the cheap fast path decides whether BFS is worth it.
pub const SHORT_CONTENT_THRESHOLD: usize = 500;

/// Maximum BFS hop count.
pub const MAX_RECURSIVE_DEPTH: u8 = 5;

/// Minimum length for a standalone unicode-escape run to be considered.
pub const MIN_ENCODED_LENGTH: usize = 8;

/// Which transformation an [`EncodingMatch`] recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum EncodingKind {
    /// Standard base64 alphabet run.
    Base64,
    /// `0x…`, `\xNN` escapes, or a bare hex run.
    Hex,
    /// Contiguous `\uXXXX` escapes.
    UnicodeEscape,
    /// Percent-encoded (`%XX`) run.
    Url,
    /// HTML character/numeric entities.
    HtmlEntity,
    /// Zero-width code points encoding a binary payload.
    ZeroWidth,
    /// Cross-script homoglyph substitution mapped back to Latin.
    Homoglyph,
    /// Context-blind ROT13 run (no explicit marker).
    Rot13,
    /// Whole string reversed.
    Reverse,
    /// International Morse code.
    Morse,
    /// ASCII-art leetspeak substitution.
    Leet,
    /// Braille Unicode block standing in for Latin letters.
    Braille,
    /// ASCII `0`/`1` binary octets.
    Binary,
    /// An explicit `"<scheme>:"` hint introduced the payload (§4.1).
    ContextAware,
}

impl EncodingKind {
    /// Canonical lowercase tag, used in traces and flags.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base64 => "base64",
            Self::Hex => "hex",
            Self::UnicodeEscape => "unicode_escape",
            Self::Url => "url",
            Self::HtmlEntity => "html_entity",
            Self::ZeroWidth => "zero_width",
            Self::Homoglyph => "homoglyph",
            Self::Rot13 => "rot13",
            Self::Reverse => "reverse",
            Self::Morse => "morse",
            Self::Leet => "leet",
            Self::Braille => "braille",
            Self::Binary => "binary",
            Self::ContextAware => "context_aware",
        }
    }
}

/// A single recovered transformation within a larger string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingMatch {
    /// Which transformation this is.
    pub kind: EncodingKind,
    /// The original (still-encoded) substring.
    pub encoded_span: String,
    /// What it decodes to.
    pub decoded_text: String,
    /// Byte offset where `encoded_span` starts in the string it was found in.
    pub start: usize,
    /// Byte offset where `encoded_span` ends (exclusive).
    pub end: usize,
    /// Confidence in `[0, 1]` that this is a genuine encoding, not coincidence.
    pub confidence: f32,
}

/// Outcome of running the encoding engine on one piece of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingResult {
    /// Whether any transformation was detected anywhere on the chosen path.
    pub has_encoding: bool,
    /// Matches found along the winning BFS path, in the order applied.
    pub matches: Vec<EncodingMatch>,
    /// The content at the end of the winning path (`== input` when
    /// `has_encoding` is false).
    pub decoded_content: String,
    /// Hop count of the winning path.
    pub recursive_decodes: u8,
    /// Shannon entropy (bits/char) of the *original* input.
    pub entropy: f64,
}

/// Run the full encoding engine on `content`.
///
/// For content of at most [`SHORT_CONTENT_THRESHOLD`] bytes the BFS always
/// runs (to catch context-blind ROT13, which has no textual marker). For
/// longer content, [`likely_has_encoding`] gates whether BFS runs at all.
#[must_use]
pub fn detect_encodings(content: &str) -> EncodingResult {
    let entropy = shannon_entropy(content);

    if content.len() > SHORT_CONTENT_THRESHOLD && !likely_has_encoding(content) {
        return EncodingResult {
            has_encoding: false,
            matches: Vec::new(),
            decoded_content: content.to_string(),
            recursive_decodes: 0,
            entropy,
        };
    }

    let mut result = recursive_decode(content);
    result.entropy = entropy;
    result
}
