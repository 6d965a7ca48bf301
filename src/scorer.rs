//! Deterministic translation quality scoring.
//!
//! Cheap surface heuristics only: length ratio, structural sanity,
//! entity carry-over and chunk-join coherence. The optimizer's
//! convergence depends on repeated calls returning identical metrics,
//! so nothing here may consult a model or any other ambient state.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const WEIGHT_CONFIDENCE: f64 = 0.30;
const WEIGHT_LENGTH: f64 = 0.20;
const WEIGHT_STRUCTURE: f64 = 0.20;
const WEIGHT_ENTITY: f64 = 0.20;
const WEIGHT_BOUNDARY: f64 = 0.10;

/// Neutral confidence when the backend reports none
const NEUTRAL_CONFIDENCE: f64 = 0.5;

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];
const CLOSING_QUOTES: &[char] = &['"', '\'', '”', '’', '»', ')'];

/// Known decoder artifacts that should never reach output
const ARTIFACT_TOKENS: &[&str] = &["[UNK]", "<unk>", "???"];

static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}[./]\d{1,2}[./]\d{2,4}").unwrap());
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:[.,]\d+)?").unwrap());
static CAPITALIZED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z][A-Za-z]+\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub confidence: f64,
    pub length_consistency: f64,
    pub structure_integrity: f64,
    pub entity_preservation: f64,
    pub boundary_coherence: f64,
    pub composite: f64,
}

/// Letter grade over the composite score, inclusive on the upper side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityGrade {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl QualityGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.90 {
            Self::A
        } else if score >= 0.80 {
            Self::B
        } else if score >= 0.70 {
            Self::C
        } else if score >= 0.60 {
            Self::D
        } else if score >= 0.50 {
            Self::E
        } else {
            Self::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
        }
    }
}

/// Score a translation against its source.
///
/// `chunk_translations` enables the boundary metric; `backend_confidence`
/// is a log-prob-derived value squashed into [0,1] when present.
pub fn score(
    source: &str,
    translation: &str,
    chunk_translations: Option<&[String]>,
    backend_confidence: Option<f64>,
) -> QualityMetrics {
    let confidence = backend_confidence.map(squash).unwrap_or(NEUTRAL_CONFIDENCE);
    let length_consistency = length_consistency(source, translation);
    let structure_integrity = structure_integrity(source, translation);
    let entity_preservation = entity_preservation(source, translation);
    let boundary_coherence = chunk_translations.map(boundary_coherence).unwrap_or(1.0);

    let composite = WEIGHT_CONFIDENCE * confidence
        + WEIGHT_LENGTH * length_consistency
        + WEIGHT_STRUCTURE * structure_integrity
        + WEIGHT_ENTITY * entity_preservation
        + WEIGHT_BOUNDARY * boundary_coherence;

    QualityMetrics {
        confidence,
        length_consistency,
        structure_integrity,
        entity_preservation,
        boundary_coherence,
        composite,
    }
}

/// Monotonic logistic squash of a log-prob-derived score into (0,1)
fn squash(raw: f64) -> f64 {
    1.0 / (1.0 + (-raw).exp())
}

/// 1.0 inside [0.8, 1.5], 0.0 outside [0.3, 3.0], linear in between
fn length_consistency(source: &str, translation: &str) -> f64 {
    let src_len = source.chars().count();
    let dst_len = translation.chars().count();
    if src_len == 0 {
        return 0.0;
    }
    let r = dst_len as f64 / src_len as f64;

    if (0.8..=1.5).contains(&r) {
        1.0
    } else if r < 0.3 || r > 3.0 {
        0.0
    } else if r < 0.8 {
        (r - 0.3) / 0.5
    } else {
        (3.0 - r) / 1.5
    }
}

fn ends_terminated(segment: &str) -> bool {
    segment
        .trim_end_matches(|c| CLOSING_QUOTES.contains(&c))
        .chars()
        .last()
        .map(|c| SENTENCE_TERMINATORS.contains(&c))
        .unwrap_or(false)
}

/// Penalize truncated lines, runaway repetition and decoder artifacts
fn structure_integrity(source: &str, translation: &str) -> f64 {
    let mut integrity: f64 = 1.0;

    // Truncation: a non-final line ending without a terminator
    let lines: Vec<&str> = translation
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() > 1 {
        for line in &lines[..lines.len() - 1] {
            if !ends_terminated(line) {
                integrity -= 0.1;
            }
        }
    }

    // Repetition: 3-grams frequent in the translation but not the source
    let translation_grams = trigram_counts(translation);
    let source_grams = trigram_counts(source);
    for (gram, count) in &translation_grams {
        if *count > 3 && source_grams.get(gram).copied().unwrap_or(0) <= 1 {
            integrity -= 0.05;
        }
    }

    // Decoder artifacts
    for token in ARTIFACT_TOKENS {
        integrity -= 0.1 * translation.matches(token).count() as f64;
    }

    integrity.max(0.0)
}

fn trigram_counts(text: &str) -> HashMap<String, usize> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut counts = HashMap::new();
    for window in words.windows(3) {
        let gram = window.join(" ").to_lowercase();
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

/// Fraction of source entities whose surface form survives translation
fn entity_preservation(source: &str, translation: &str) -> f64 {
    let mut entities: Vec<Vec<String>> = Vec::new();

    // Dates first, so their digit groups are not double-counted as numbers
    let mut date_spans: Vec<(usize, usize)> = Vec::new();
    for m in DATE_RE.find_iter(source) {
        date_spans.push((m.start(), m.end()));
        let surface = m.as_str().to_string();
        let swapped = if surface.contains('/') {
            surface.replace('/', ".")
        } else {
            surface.replace('.', "/")
        };
        entities.push(vec![surface, swapped]);
    }

    for m in NUMBER_RE.find_iter(source) {
        if date_spans.iter().any(|&(s, e)| m.start() >= s && m.end() <= e) {
            continue;
        }
        entities.push(vec![m.as_str().to_string()]);
    }

    // Capitalized tokens that do not open a sentence
    for m in CAPITALIZED_RE.find_iter(source) {
        let before = source[..m.start()].trim_end();
        let sentence_initial = before.is_empty()
            || before
                .trim_end_matches(|c| CLOSING_QUOTES.contains(&c))
                .chars()
                .last()
                .map(|c| SENTENCE_TERMINATORS.contains(&c))
                .unwrap_or(true);
        if !sentence_initial {
            entities.push(vec![m.as_str().to_string()]);
        }
    }

    if entities.is_empty() {
        return 1.0;
    }

    let preserved = entities
        .iter()
        .filter(|forms| forms.iter().any(|f| translation.contains(f.as_str())))
        .count();
    preserved as f64 / entities.len() as f64
}

/// 1.0 minus 0.1 per incoherent chunk join, floored at 0
fn boundary_coherence(chunk_translations: &[String]) -> f64 {
    let mut bad_joins = 0usize;
    for pair in chunk_translations.windows(2) {
        let prev_open = !ends_terminated(pair[0].trim());
        let next_lower = pair[1]
            .trim_start()
            .chars()
            .next()
            .map(|c| c.is_lowercase())
            .unwrap_or(false);
        if prev_open && next_lower {
            bad_joins += 1;
        }
    }
    (1.0 - 0.1 * bad_joins as f64).max(0.0)
}
