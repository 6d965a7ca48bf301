//! Semantic chunking of long source text.
//!
//! Splits on sentence terminators first, clause separators second, and
//! plain word boundaries last, so every chunk edge lands on a natural
//! boundary. Chunks are contiguous trimmed spans of the source; joining
//! them with single spaces reproduces the source modulo whitespace.

use serde::Serialize;

/// Sentence terminators; a closing quote after one stays with the sentence
const TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];
const CLOSING_QUOTES: &[char] = &['"', '\'', '”', '’', '»', ')'];

/// One contiguous piece of the source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Dense position, assigned from 0 in source order
    pub index: usize,
    pub text: String,
    /// Character offsets of the trimmed span in the source
    pub char_range: (usize, usize),
}

/// Coarse shape label used for optimizer cache keying.
///
/// The taxonomy is frozen: changing a rule invalidates every cached
/// optimal size, so these thresholds are not configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    Short,
    Prose,
    Dialog,
    Technical,
}

impl ContentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Prose => "prose",
            Self::Dialog => "dialog",
            Self::Technical => "technical",
        }
    }
}

const SHORT_CLASS_LIMIT: usize = 200;
const DIALOG_QUOTE_RATIO: f64 = 0.01;
const TECHNICAL_SYMBOL_RATIO: f64 = 0.05;
const TECHNICAL_UPPER_RATIO: f64 = 0.30;

/// Classify text shape from punctuation and case ratios
pub fn content_class(text: &str) -> ContentClass {
    let total = text.chars().count();
    if total == 0 || total < SHORT_CLASS_LIMIT {
        return ContentClass::Short;
    }

    let mut quotes = 0usize;
    let mut symbols = 0usize;
    let mut upper = 0usize;
    let mut letters = 0usize;

    for ch in text.chars() {
        match ch {
            '"' | '“' | '”' | '«' | '»' => quotes += 1,
            '_' | '/' | '\\' | '{' | '}' | '[' | ']' | '=' | '<' | '>' | '#' | '`' => {
                symbols += 1
            }
            _ => {}
        }
        if ch.is_alphabetic() {
            letters += 1;
            if ch.is_uppercase() {
                upper += 1;
            }
        }
    }

    let quote_ratio = quotes as f64 / total as f64;
    let symbol_ratio = symbols as f64 / total as f64;
    let upper_ratio = if letters > 0 {
        upper as f64 / letters as f64
    } else {
        0.0
    };

    if symbol_ratio > TECHNICAL_SYMBOL_RATIO || upper_ratio > TECHNICAL_UPPER_RATIO {
        ContentClass::Technical
    } else if quote_ratio > DIALOG_QUOTE_RATIO {
        ContentClass::Dialog
    } else {
        ContentClass::Prose
    }
}

/// Byte span of a piece within the source
#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

/// Split `text` into chunks of at most `max_chunk_size` characters.
///
/// A single word longer than the limit becomes a chunk of exactly that
/// word; nothing is ever split inside a word.
pub fn chunk(text: &str, max_chunk_size: usize) -> Vec<Chunk> {
    let max = max_chunk_size.max(1);

    if text.trim().is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= max {
        return finalize(text, vec![Span {
            start: 0,
            end: text.len(),
        }]);
    }

    // Sentence pieces first; any piece still over the limit is broken
    // down further before greedy accumulation.
    let mut pieces: Vec<Span> = Vec::new();
    for sentence in split_sentences(text) {
        if char_len(text, sentence) <= max {
            pieces.push(sentence);
            continue;
        }
        for clause in split_clauses(text, sentence) {
            if char_len(text, clause) <= max {
                pieces.push(clause);
            } else {
                pieces.extend(split_words(text, clause, max));
            }
        }
    }

    // Greedy accumulation: extend the open span while the combined
    // trimmed length stays within the limit.
    let mut spans: Vec<Span> = Vec::new();
    let mut current: Option<Span> = None;
    for piece in pieces {
        match current {
            None => current = Some(piece),
            Some(open) => {
                let candidate = Span {
                    start: open.start,
                    end: piece.end,
                };
                if trimmed_char_len(text, candidate) <= max {
                    current = Some(candidate);
                } else {
                    spans.push(open);
                    current = Some(piece);
                }
            }
        }
    }
    if let Some(open) = current {
        spans.push(open);
    }

    finalize(text, spans)
}

/// Character count of a span
fn char_len(text: &str, span: Span) -> usize {
    text[span.start..span.end].chars().count()
}

fn trimmed_char_len(text: &str, span: Span) -> usize {
    text[span.start..span.end].trim().chars().count()
}

/// Sentence boundaries: after a terminator plus any closing quotes
fn split_sentences(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if TERMINATORS.contains(&ch) {
            let mut end = idx + ch.len_utf8();
            while let Some(&(qidx, qch)) = chars.peek() {
                if CLOSING_QUOTES.contains(&qch) {
                    end = qidx + qch.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            spans.push(Span { start, end });
            start = end;
        }
    }
    if start < text.len() {
        spans.push(Span {
            start,
            end: text.len(),
        });
    }
    spans
}

/// Clause boundaries inside an over-long sentence.
///
/// Commas, semicolons and colons split after the separator; dashes only
/// when they stand between whitespace, so hyphenated words stay intact.
fn split_clauses(text: &str, span: Span) -> Vec<Span> {
    let slice = &text[span.start..span.end];
    let mut spans = Vec::new();
    let mut start = span.start;
    let mut chars = slice.char_indices().peekable();
    let mut prev_ws = true;

    while let Some((idx, ch)) = chars.next() {
        let abs = span.start + idx;
        let split_after = match ch {
            ';' | ':' | ',' | '—' => true,
            '-' => {
                let next_ws = chars
                    .peek()
                    .map(|&(_, c)| c.is_whitespace())
                    .unwrap_or(true);
                prev_ws && next_ws
            }
            _ => false,
        };
        if split_after {
            let end = abs + ch.len_utf8();
            if end > start {
                spans.push(Span { start, end });
            }
            start = end;
        }
        prev_ws = ch.is_whitespace();
    }
    if start < span.end {
        spans.push(Span {
            start,
            end: span.end,
        });
    }
    spans
}

/// Word-boundary fallback; a single oversized word survives whole
fn split_words(text: &str, span: Span, max: usize) -> Vec<Span> {
    let slice = &text[span.start..span.end];
    let mut spans = Vec::new();
    let mut current: Option<Span> = None;

    let mut word_start: Option<usize> = None;
    let push_word = |spans: &mut Vec<Span>, current: &mut Option<Span>, word: Span| {
        match *current {
            None => *current = Some(word),
            Some(open) => {
                let candidate = Span {
                    start: open.start,
                    end: word.end,
                };
                if char_len(text, candidate) <= max {
                    *current = Some(candidate);
                } else {
                    spans.push(open);
                    *current = Some(word);
                }
            }
        }
    };

    for (idx, ch) in slice.char_indices() {
        let abs = span.start + idx;
        if ch.is_whitespace() {
            if let Some(ws) = word_start.take() {
                push_word(&mut spans, &mut current, Span { start: ws, end: abs });
            }
        } else if word_start.is_none() {
            word_start = Some(abs);
        }
    }
    if let Some(ws) = word_start {
        push_word(&mut spans, &mut current, Span {
            start: ws,
            end: span.end,
        });
    }
    if let Some(open) = current {
        spans.push(open);
    }
    spans
}

/// Trim spans, drop empties, assign dense indices and char ranges
fn finalize(text: &str, spans: Vec<Span>) -> Vec<Chunk> {
    // Byte offset of every char, for byte->char conversion
    let char_starts: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let to_char_idx = |byte: usize| char_starts.partition_point(|&b| b < byte);

    let mut chunks = Vec::new();
    for span in spans {
        let slice = &text[span.start..span.end];
        let trimmed = slice.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lead = slice.len() - slice.trim_start().len();
        let trail = slice.len() - slice.trim_end().len();
        let start_byte = span.start + lead;
        let end_byte = span.end - trail;
        chunks.push(Chunk {
            index: chunks.len(),
            text: trimmed.to_string(),
            char_range: (to_char_idx(start_byte), to_char_idx(end_byte)),
        });
    }
    chunks
}

/// Join per-chunk texts in index order with single spaces
pub fn join_chunks(texts: &[String]) -> String {
    texts
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collapse all whitespace runs to single spaces
pub fn normalize_whitespace(s: &str) -> String {
    let mut output = String::with_capacity(s.len());
    let mut iter = s.split_whitespace();
    if let Some(first) = iter.next() {
        output.push_str(first);
        for word in iter {
            output.push(' ');
            output.push_str(word);
        }
    }
    output
}
