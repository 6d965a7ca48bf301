//! Language code normalization between public ISO-style codes and
//! backend-native schemes.
//!
//! Public codes are ISO-639-1 with an optional script tag (`zh`, `zh-Hans`).
//! The specialized backend speaks `xxx_Scrp` codes, the generative backend
//! is prompted with English language names. Translation between forms
//! happens only here.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::backend::BackendFamily;
use crate::error::{Result, TranslateError};

/// Sentinel for "detect the source language"
pub const AUTO: &str = "auto";

/// (public, specialized native, generative native)
///
/// A `None` specialized entry means the seq2seq model has no trained
/// direction for that language; only the generative backend can serve it.
const TABLE: &[(&str, Option<&str>, &str)] = &[
    ("en", Some("eng_Latn"), "English"),
    ("ru", Some("rus_Cyrl"), "Russian"),
    ("es", Some("spa_Latn"), "Spanish"),
    ("fr", Some("fra_Latn"), "French"),
    ("de", Some("deu_Latn"), "German"),
    ("pt", Some("por_Latn"), "Portuguese"),
    ("it", Some("ita_Latn"), "Italian"),
    ("ar", Some("arb_Arab"), "Arabic"),
    ("hi", Some("hin_Deva"), "Hindi"),
    ("zh", Some("zho_Hans"), "Chinese"),
    ("ja", Some("jpn_Jpan"), "Japanese"),
    ("ko", Some("kor_Hang"), "Korean"),
    ("yo", None, "Yoruba"),
];

static TO_SPECIALIZED: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    TABLE
        .iter()
        .filter_map(|(public, spec, _)| spec.map(|s| (*public, s)))
        .collect()
});

static FROM_SPECIALIZED: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    TABLE
        .iter()
        .filter_map(|(public, spec, _)| spec.map(|s| (s, *public)))
        .collect()
});

static TO_GENERATIVE: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| TABLE.iter().map(|(public, _, name)| (*public, *name)).collect());

static FROM_GENERATIVE: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    TABLE
        .iter()
        .map(|(public, _, name)| (name.to_lowercase(), *public))
        .collect()
});

/// Normalize a user-supplied code to its canonical public form.
///
/// Case-insensitive; an optional script tag (`zh-Hans`) is accepted and
/// stripped. `auto` passes through unchanged.
pub fn normalize(code: &str) -> Result<String> {
    let lowered = code.trim().to_lowercase();
    if lowered == AUTO {
        return Ok(lowered);
    }
    let primary = lowered.split(['-', '_']).next().unwrap_or(&lowered);
    if TO_GENERATIVE.contains_key(primary) {
        Ok(primary.to_string())
    } else {
        Err(TranslateError::UnsupportedLanguage {
            code: code.to_string(),
        })
    }
}

/// Map a canonical public code to the backend-native form
pub fn to_backend(public_code: &str, family: BackendFamily) -> Result<&'static str> {
    let table = match family {
        BackendFamily::Specialized => &*TO_SPECIALIZED,
        BackendFamily::Generative => &*TO_GENERATIVE,
    };
    table
        .get(public_code)
        .copied()
        .ok_or_else(|| TranslateError::UnsupportedLanguage {
            code: public_code.to_string(),
        })
}

/// Map a backend-native code back to the canonical public form
pub fn from_backend(backend_code: &str, family: BackendFamily) -> Result<&'static str> {
    let found = match family {
        BackendFamily::Specialized => FROM_SPECIALIZED.get(backend_code).copied(),
        BackendFamily::Generative => FROM_GENERATIVE.get(&backend_code.to_lowercase()).copied(),
    };
    found.ok_or_else(|| TranslateError::UnsupportedLanguage {
        code: backend_code.to_string(),
    })
}

/// Public codes a backend family can serve
pub fn supported(family: BackendFamily) -> Vec<&'static str> {
    match family {
        BackendFamily::Specialized => TABLE
            .iter()
            .filter(|(_, spec, _)| spec.is_some())
            .map(|(public, _, _)| *public)
            .collect(),
        BackendFamily::Generative => TABLE.iter().map(|(public, _, _)| *public).collect(),
    }
}
