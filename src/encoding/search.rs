//! Bounded BFS over decode paths.
//!
//! Each hop runs every detector in [`super::detectors`] once, applies all
//! non-overlapping matches it found (right-to-left, so earlier offsets stay
//! valid), and enqueues the result. The path with the highest readability
//! score wins, not simply the deepest one — over-eager decoding a name or
//! an acronym that happens to look like hex should lose to stopping early.

use super::detectors;
use super::{EncodingMatch, EncodingResult, MAX_RECURSIVE_DEPTH};
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};

/// Minimum detector confidence to apply a match. Below this, a detector
/// fired on something that merely resembles an encoding (an acronym that
/// happens to look like hex, a name that scans as base64-alphabet) and
/// applying it would corrupt otherwise-plain text.
const MIN_APPLY_CONFIDENCE: f32 = 0.7;

const COMMON_WORDS: &[&str] = &[
    "the", "a", "is", "to", "and", "of", "in", "you", "it", "that", "this",
    "all", "ignore", "previous", "instructions", "please", "what", "how",
    "are", "for", "with", "your", "system", "prompt", "can", "do",
];

fn content_hash(s: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

fn readability_score(text: &str) -> f32 {
    if text.is_empty() {
        return 0.0;
    }
    let total_chars = text.chars().count() as f32;
    let printable = text.chars().filter(|c| !c.is_control()).count() as f32;
    let spaces = text.chars().filter(|c| c.is_whitespace()).count() as f32;

    let lower = text.to_lowercase();
    let word_count = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| COMMON_WORDS.contains(w))
        .count() as f32;

    let mut score = 50.0 * (printable / total_chars) + 10.0 * word_count + 20.0 * (spaces / total_chars);

    let looks_like_leftover_base64 = text
        .split_whitespace()
        .any(|tok| tok.len() >= 40 && tok.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));
    if looks_like_leftover_base64 {
        score -= 20.0;
    }

    score
}

/// Pick a maximal non-overlapping subset of matches, preferring higher
/// confidence when spans collide, then apply them right-to-left.
fn apply_matches(content: &str, mut matches: Vec<EncodingMatch>) -> (String, Vec<EncodingMatch>) {
    matches.sort_by(|a, b| a.start.cmp(&b.start).then(b.confidence.partial_cmp(&a.confidence).unwrap()));

    let mut selected: Vec<EncodingMatch> = Vec::new();
    let mut last_end = 0usize;
    for m in matches {
        if m.start >= last_end {
            last_end = m.end;
            selected.push(m);
        }
    }

    let mut result = content.to_string();
    for m in selected.iter().rev() {
        if m.end <= result.len() && result.is_char_boundary(m.start) && result.is_char_boundary(m.end) {
            result.replace_range(m.start..m.end, &m.decoded_text);
        }
    }

    (result, selected)
}

/// Run the BFS. Always returns a result, even when nothing decodes
/// (`has_encoding: false`, `decoded_content == content`).
#[must_use]
pub fn recursive_decode(content: &str) -> EncodingResult {
    let mut visited: HashSet<u64> = HashSet::new();
    visited.insert(content_hash(content));

    let mut queue: VecDeque<(String, Vec<EncodingMatch>, u8)> = VecDeque::new();
    queue.push_back((content.to_string(), Vec::new(), 0));

    let baseline_score = readability_score(content);
    let mut best = (content.to_string(), Vec::<EncodingMatch>::new(), 0u8, baseline_score);

    while let Some((cur, trace, depth)) = queue.pop_front() {
        if depth >= MAX_RECURSIVE_DEPTH {
            continue;
        }

        let mut matches = detectors::detect_all(&cur);
        if matches.is_empty() && cur.len() <= super::SHORT_CONTENT_THRESHOLD {
            if let Some(m) = detectors::detect_rot13_context_blind(&cur) {
                matches.push(m);
            }
        }
        matches.retain(|m| m.confidence >= MIN_APPLY_CONFIDENCE);
        if matches.is_empty() {
            continue;
        }

        let (new_content, applied) = apply_matches(&cur, matches);
        if applied.is_empty() || new_content == cur {
            continue;
        }

        let mut new_trace = trace.clone();
        let confidence_bonus: f32 = applied.iter().map(|m| m.confidence).sum();
        new_trace.extend(applied);
        let new_depth = depth + 1;

        let score = readability_score(&new_content) + 20.0 * confidence_bonus;
        if score > best.3 {
            best = (new_content.clone(), new_trace.clone(), new_depth, score);
        }

        let hash = content_hash(&new_content);
        if visited.insert(hash) && new_depth < MAX_RECURSIVE_DEPTH {
            queue.push_back((new_content, new_trace, new_depth));
        }
    }

    let has_encoding = !best.1.is_empty();
    EncodingResult {
        has_encoding,
        matches: best.1,
        decoded_content: best.0,
        recursive_decodes: if has_encoding { best.2 } else { 0 },
        entropy: 0.0,
    }
}
