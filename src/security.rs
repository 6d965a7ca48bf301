//! Log hygiene helpers.
//!
//! User text reaches logs only as a bounded preview, and anything that
//! looks like a credential is redacted first. Identity tokens are
//! accepted opaquely for cache keying and must never be printed.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// Maximum user-text length allowed in a log line
const MAX_PREVIEW_LEN: usize = 60;

static SECRET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)((?:api[_-]?key|token|secret|password|bearer|authorization)\s*[:=]\s*)([^\s"',}\]]+)"#)
        .unwrap()
});

/// Redact credential-shaped substrings
pub fn redact_secrets(text: &str) -> Cow<'_, str> {
    SECRET_RE.replace_all(text, "$1[REDACTED]")
}

/// Short, redacted preview of user text for log lines
pub fn preview(text: &str) -> String {
    let redacted = redact_secrets(text);
    let truncated: String = redacted.chars().take(MAX_PREVIEW_LEN).collect();
    if redacted.chars().count() > MAX_PREVIEW_LEN {
        format!("{truncated}… ({} chars)", text.chars().count())
    } else {
        truncated
    }
}
