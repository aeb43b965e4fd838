//! Fast, offline-only pattern scorer.
//!
//! This is the cheap first line of defense: a fixed set of regexes and
//! character-class checks, weighted and summed into a single integer
//! score. It never calls a model and never blocks on its own — callers
//! compare the score against the `escalate_above`/`block_above`
//! thresholds or feed it into a [`crate::strategy`] node.

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// A category a [`HeuristicHit`] falls into, mirroring the families
/// enumerated in the heuristics module of the spec (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum HeuristicCategory {
    /// "Ignore previous instructions", "disregard the above", etc.
    InstructionOverride,
    /// "You are now DAN", "pretend you have no restrictions".
    RoleSubversion,
    /// "Reveal your system prompt", "repeat the text above verbatim".
    PromptExtraction,
    /// Delimiter/fence injection meant to break out of a quoting scheme.
    DelimiterManipulation,
    /// Elevated proportion of zero-width or bidi-control characters.
    SuspiciousCharClass,
    /// Disproportionate mix of upper/lowercase within individual words.
    MixedCase,
    /// A chat-template role/turn marker embedded in plain content.
    ChatTemplateMarker,
    /// A long run drawn entirely from the base64 alphabet.
    Base64Run,
    /// Lookalike (confusable) characters substituted for ASCII.
    Confusable,
    /// Repeated `!`/`?` punctuation clusters.
    PunctuationCluster,
}

impl HeuristicCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InstructionOverride => "instruction_override",
            Self::RoleSubversion => "role_subversion",
            Self::PromptExtraction => "prompt_extraction",
            Self::DelimiterManipulation => "delimiter_manipulation",
            Self::SuspiciousCharClass => "suspicious_char_class",
            Self::MixedCase => "mixed_case",
            Self::ChatTemplateMarker => "chat_template_marker",
            Self::Base64Run => "base64_run",
            Self::Confusable => "confusable",
            Self::PunctuationCluster => "punctuation_cluster",
        }
    }
}

/// One matched pattern, with the span it fired on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicHit {
    pub category: HeuristicCategory,
    pub pattern_id: String,
    pub weight: u32,
    pub matched_text: String,
    pub start: usize,
    pub end: usize,
}

/// Aggregate result of [`score`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicResult {
    pub score: u32,
    pub hits: Vec<HeuristicHit>,
}

/// Default decision thresholds a strategy node compares [`HeuristicResult::score`]
/// against (§4.2's "Decision" paragraph).
pub const DEFAULT_ESCALATE_ABOVE: u32 = 3;
pub const DEFAULT_BLOCK_ABOVE: u32 = 10;

impl HeuristicResult {
    /// Whether the score clears an arbitrary threshold, kept for callers
    /// that want a single knob rather than the escalate/block pair.
    #[must_use]
    pub fn exceeds(&self, threshold: u32) -> bool {
        self.score >= threshold
    }

    #[must_use]
    pub fn should_escalate(&self) -> bool {
        self.score > DEFAULT_ESCALATE_ABOVE
    }

    #[must_use]
    pub fn should_block(&self) -> bool {
        self.score > DEFAULT_BLOCK_ABOVE
    }
}

struct PatternEntry {
    id: &'static str,
    category: HeuristicCategory,
    weight: u32,
    regex_str: &'static str,
}

const PATTERNS: &[PatternEntry] = &[
    PatternEntry { id: "override-ignore-previous", category: HeuristicCategory::InstructionOverride, weight: 5, regex_str: r"(?i)\b(ignore|disregard|forget)\s+(all\s+|any\s+)?(the\s+)?(previous|prior|above|earlier)\s+(instructions?|prompts?|rules?)\b" },
    PatternEntry { id: "override-new-instructions", category: HeuristicCategory::InstructionOverride, weight: 4, regex_str: r"(?i)\b(new|updated|real)\s+instructions?\s*(are|follow|below)\b" },
    PatternEntry { id: "override-from-now-on", category: HeuristicCategory::InstructionOverride, weight: 2, regex_str: r"(?i)\bfrom\s+now\s+on\b.{0,40}\b(you|your)\b" },
    PatternEntry { id: "role-dan", category: HeuristicCategory::RoleSubversion, weight: 5, regex_str: r"(?i)\byou\s+are\s+now\s+(DAN|a\s+jailbroken|an?\s+unrestricted)\b" },
    PatternEntry { id: "role-no-restrictions", category: HeuristicCategory::RoleSubversion, weight: 4, regex_str: r"(?i)\b(pretend|act as if)\s+you\s+(have\s+no|have\s+no\s+longer\s+any)\s+(restrictions|rules|filters|guidelines)\b" },
    PatternEntry { id: "role-developer-mode", category: HeuristicCategory::RoleSubversion, weight: 4, regex_str: r"(?i)\b(developer|debug|admin)\s+mode\s+(enabled|activated|on)\b" },
    PatternEntry { id: "extraction-system-prompt", category: HeuristicCategory::PromptExtraction, weight: 4, regex_str: r"(?i)\b(reveal|show|print|repeat|output)\s+(me\s+)?(your|the)\s+(system\s+prompt|instructions|initial\s+prompt)\b" },
    PatternEntry { id: "extraction-verbatim-above", category: HeuristicCategory::PromptExtraction, weight: 3, regex_str: r"(?i)\brepeat\s+(the\s+)?(text|everything)\s+above\s+verbatim\b" },
    PatternEntry { id: "delimiter-fence-break", category: HeuristicCategory::DelimiterManipulation, weight: 3, regex_str: r"(?i)```\s*(system|end\s*of\s*(prompt|instructions))" },
    PatternEntry { id: "delimiter-end-marker", category: HeuristicCategory::DelimiterManipulation, weight: 2, regex_str: r"(?i)\[?(end\s+of\s+(user\s+)?(input|message|context))\]?" },
];

static PATTERN_SET: LazyLock<RegexSet> =
    LazyLock::new(|| RegexSet::new(PATTERNS.iter().map(|p| p.regex_str)).unwrap());
static PATTERN_REGEXES: LazyLock<Vec<Regex>> =
    LazyLock::new(|| PATTERNS.iter().map(|p| Regex::new(p.regex_str).unwrap()).collect());

/// Chat-template role/turn markers that have no business appearing inside
/// plain user content; their presence suggests an attempt to splice a
/// fake turn into the rendered prompt.
const CHAT_TEMPLATE_MARKERS: &[&str] = &[
    "<|im_start|>",
    "<|im_end|>",
    "[INST]",
    "[/INST]",
    "<<SYS>>",
    "<</SYS>>",
    "### Instruction:",
    "### Response:",
];

static PUNCTUATION_CLUSTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[!?]{2,}").unwrap());

const MAX_MATCHED_TEXT: usize = 80;

fn truncate_matched(text: &str) -> String {
    if text.len() <= MAX_MATCHED_TEXT {
        text.to_string()
    } else {
        let mut end = MAX_MATCHED_TEXT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

fn is_zero_width(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}' | '\u{FEFF}'
    )
}

/// Count of zero-width/bidi-control characters present in `text`.
fn zero_width_count(text: &str) -> usize {
    text.chars().filter(|c| is_zero_width(*c)).count()
}

/// Ratio of alphabetic words that mix upper- and lowercase letters in a
/// way plain writing rarely does (e.g. `iGnOrE`), over all alphabetic
/// words in `text`.
fn mixed_case_word_ratio(text: &str) -> f32 {
    let words: Vec<&str> = text.split_whitespace().filter(|w| w.chars().any(char::is_alphabetic)).collect();
    if words.is_empty() {
        return 0.0;
    }
    let mixed = words
        .iter()
        .filter(|w| {
            let has_upper = w.chars().any(char::is_uppercase);
            let has_lower = w.chars().any(char::is_lowercase);
            has_upper && has_lower && !is_title_case(w)
        })
        .count();
    mixed as f32 / words.len() as f32
}

/// A leading capital followed by all-lowercase is ordinary title case,
/// not the alternating-case obfuscation this check targets.
fn is_title_case(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() => chars.all(|c| !c.is_uppercase()),
        _ => false,
    }
}

const BASE64_RUN_MIN_LEN: usize = 30;

static BASE64_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/]{30,}={0,2}").unwrap());

/// Unicode characters commonly substituted for ASCII lookalikes in
/// homoglyph obfuscation (Cyrillic/Greek letters that render identically
/// to Latin ones).
const CONFUSABLES: &[char] = &[
    'а', 'е', 'о', 'р', 'с', 'у', 'х', // Cyrillic a e o p c y x
    'А', 'В', 'Е', 'К', 'М', 'Н', 'О', 'Р', 'С', 'Т', 'Х', // Cyrillic uppercase
    'ο', 'α', 'ρ', 'υ', // Greek lookalikes
];

fn confusable_count(text: &str) -> usize {
    text.chars().filter(|c| CONFUSABLES.contains(c)).count()
}

/// Score `text` against the fixed pattern set plus the character-class
/// and structural checks. Weights are additive, non-negative integers;
/// callers compare the total against [`DEFAULT_ESCALATE_ABOVE`] /
/// [`DEFAULT_BLOCK_ABOVE`] or their own threshold.
#[must_use]
pub fn score(text: &str) -> HeuristicResult {
    let mut hits = Vec::new();
    let mut total: u32 = 0;

    for idx in PATTERN_SET.matches(text).iter() {
        let entry = &PATTERNS[idx];
        let regex = &PATTERN_REGEXES[idx];
        if let Some(m) = regex.find(text) {
            total += entry.weight;
            hits.push(HeuristicHit {
                category: entry.category,
                pattern_id: entry.id.to_string(),
                weight: entry.weight,
                matched_text: truncate_matched(m.as_str()),
                start: m.start(),
                end: m.end(),
            });
        }
    }

    let zw = zero_width_count(text);
    if zw > 2 {
        let weight = zw.min(5) as u32;
        total += weight;
        hits.push(HeuristicHit {
            category: HeuristicCategory::SuspiciousCharClass,
            pattern_id: "char-class-zero-width-density".to_string(),
            weight,
            matched_text: format!("{zw} zero-width/bidi-control code points"),
            start: 0,
            end: text.len(),
        });
    }

    let mixed_ratio = mixed_case_word_ratio(text);
    if mixed_ratio > 0.25 {
        let weight = (mixed_ratio * 10.0).round() as u32;
        if weight > 0 {
            total += weight;
            hits.push(HeuristicHit {
                category: HeuristicCategory::MixedCase,
                pattern_id: "mixed-case-word-ratio".to_string(),
                weight,
                matched_text: format!("{:.0}% of words are mixed-case", mixed_ratio * 100.0),
                start: 0,
                end: text.len(),
            });
        }
    }

    if let Some(marker) = CHAT_TEMPLATE_MARKERS.iter().find(|m| text.contains(**m)) {
        total += 5;
        hits.push(HeuristicHit {
            category: HeuristicCategory::ChatTemplateMarker,
            pattern_id: "chat-template-marker".to_string(),
            weight: 5,
            matched_text: (*marker).to_string(),
            start: 0,
            end: text.len(),
        });
    }

    if let Some(m) = BASE64_RUN.find(text) {
        if m.as_str().len() >= BASE64_RUN_MIN_LEN {
            total += 4;
            hits.push(HeuristicHit {
                category: HeuristicCategory::Base64Run,
                pattern_id: "base64-alphabet-run".to_string(),
                weight: 4,
                matched_text: truncate_matched(m.as_str()),
                start: m.start(),
                end: m.end(),
            });
        }
    }

    let confusables = confusable_count(text);
    if confusables > 3 {
        total += 3;
        hits.push(HeuristicHit {
            category: HeuristicCategory::Confusable,
            pattern_id: "unicode-confusables".to_string(),
            weight: 3,
            matched_text: format!("{confusables} confusable code points"),
            start: 0,
            end: text.len(),
        });
    }

    let cluster_count = PUNCTUATION_CLUSTER.find_iter(text).count();
    if cluster_count > 3 {
        total += 2;
        hits.push(HeuristicHit {
            category: HeuristicCategory::PunctuationCluster,
            pattern_id: "punctuation-cluster".to_string(),
            weight: 2,
            matched_text: format!("{cluster_count} `!?` clusters"),
            start: 0,
            end: text.len(),
        });
    }

    HeuristicResult { score: total, hits }
}
