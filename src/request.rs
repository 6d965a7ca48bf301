//! Request and result shapes for the translation entry point.
//!
//! One request type serves every API shape: the legacy, model-aware and
//! adaptive surfaces differ only in which optional fields they populate,
//! and serde defaults fill the rest.

use serde::{Deserialize, Serialize};

use crate::scorer::QualityGrade;

pub const MODEL_PREFERENCE_AUTO: &str = "auto";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationMode {
    Direct,
    Semantic,
    #[default]
    Adaptive,
    Progressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserPreference {
    Fast,
    #[default]
    Balanced,
    Quality,
}

/// How the final text was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Direct,
    Semantic,
    Optimized,
    Cached,
}

/// Immutable once accepted; validation happens at the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,

    #[serde(default = "default_source_lang")]
    pub source_lang: String,

    pub target_lang: String,

    /// `auto` or a registered backend id
    #[serde(default = "default_model_preference")]
    pub model_preference: String,

    #[serde(default)]
    pub mode: TranslationMode,

    #[serde(default)]
    pub user_preference: UserPreference,

    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,

    #[serde(default = "default_max_optimization_time_s")]
    pub max_optimization_time_s: u64,

    #[serde(default)]
    pub force_optimization: bool,

    /// Caller identity, accepted opaquely; partitions the result cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

fn default_source_lang() -> String {
    crate::langcode::AUTO.into()
}
fn default_model_preference() -> String {
    MODEL_PREFERENCE_AUTO.into()
}
fn default_quality_threshold() -> f64 {
    0.85
}
fn default_max_optimization_time_s() -> u64 {
    5
}

impl TranslationRequest {
    /// Minimal request in the legacy shape
    pub fn simple(text: &str, source_lang: &str, target_lang: &str) -> Self {
        Self {
            text: text.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            model_preference: default_model_preference(),
            mode: TranslationMode::default(),
            user_preference: UserPreference::default(),
            quality_threshold: default_quality_threshold(),
            max_optimization_time_s: default_max_optimization_time_s(),
            force_optimization: false,
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub translated_text: String,
    pub detected_source_lang: String,
    pub backend_used: String,
    pub method: Method,
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_grade: Option<QualityGrade>,
    pub optimization_applied: bool,
    pub cache_hit: bool,
    pub processing_time_ms: u64,
}
