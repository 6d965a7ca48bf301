//! Script-based source language detection.
//!
//! Counts code points per script block and maps the dominant block to its
//! default language. Deterministic, O(n), no model involved. This is the
//! fallback path; a ready backend's own detector takes precedence.

/// Minimum share of alphabetic characters a script must hold
const DOMINANCE_THRESHOLD: f64 = 0.5;

/// Returned when no script reaches the dominance threshold
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptDetection {
    /// Public language code, or [`UNKNOWN`]
    pub language: &'static str,
    /// Share of alphabetic characters in the winning script
    pub share: f64,
}

#[derive(Debug, Default)]
struct ScriptCounts {
    latin: usize,
    cyrillic: usize,
    arabic: usize,
    devanagari: usize,
    han: usize,
    kana: usize,
    hangul: usize,
    alphabetic: usize,
}

fn count_scripts(text: &str) -> ScriptCounts {
    let mut counts = ScriptCounts::default();

    for ch in text.chars() {
        let block = match ch {
            'A'..='Z' | 'a'..='z' | '\u{00C0}'..='\u{024F}' => Some(&mut counts.latin),
            '\u{0400}'..='\u{04FF}' | '\u{0500}'..='\u{052F}' => Some(&mut counts.cyrillic),
            '\u{0600}'..='\u{06FF}' | '\u{0750}'..='\u{077F}' => Some(&mut counts.arabic),
            '\u{0900}'..='\u{097F}' => Some(&mut counts.devanagari),
            // CJK Unified Ideographs (main block + extension A + compatibility)
            '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}' => {
                Some(&mut counts.han)
            }
            // Hiragana, Katakana, Katakana Phonetic Extensions
            '\u{3040}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}' | '\u{31F0}'..='\u{31FF}' => {
                Some(&mut counts.kana)
            }
            // Hangul Syllables, Jamo, Compatibility Jamo
            '\u{AC00}'..='\u{D7AF}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}' => {
                Some(&mut counts.hangul)
            }
            _ => None,
        };

        if let Some(slot) = block {
            *slot += 1;
            counts.alphabetic += 1;
        } else if ch.is_alphabetic() {
            counts.alphabetic += 1;
        }
    }

    counts
}

/// Detect the dominant script's default language.
///
/// Han with any Kana present scores as Japanese: Japanese prose mixes
/// Kanji with Kana, so pure ideograph counting would misread it as Chinese.
pub fn detect(text: &str) -> ScriptDetection {
    let counts = count_scripts(text);

    if counts.alphabetic == 0 {
        return ScriptDetection {
            language: UNKNOWN,
            share: 0.0,
        };
    }

    let (japanese, chinese) = if counts.kana > 0 {
        (counts.kana + counts.han, 0)
    } else {
        (0, counts.han)
    };

    let scores = [
        ("en", counts.latin),
        ("ru", counts.cyrillic),
        ("ar", counts.arabic),
        ("hi", counts.devanagari),
        ("zh", chinese),
        ("ja", japanese),
        ("ko", counts.hangul),
    ];

    let mut best = ("", 0usize);
    for (lang, count) in scores {
        if count > best.1 {
            best = (lang, count);
        }
    }

    let share = best.1 as f64 / counts.alphabetic as f64;
    if best.1 == 0 || share < DOMINANCE_THRESHOLD {
        ScriptDetection {
            language: UNKNOWN,
            share,
        }
    } else {
        ScriptDetection {
            language: best.0,
            share,
        }
    }
}
