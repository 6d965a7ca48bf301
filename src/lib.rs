//! Adaptive translation core.
//!
//! Fronts heterogeneous neural translation backends (a specialized
//! encoder-decoder and a generative instructed LLM) behind one
//! `translate(request) -> result` entry point, deciding per request
//! whether to translate directly, chunk semantically, or search for a
//! quality-maximizing chunk size. Progressive mode streams per-chunk
//! events as they complete.
//!
//! HTTP framing, authentication and rate limiting are external
//! collaborators; mount [`controller::TranslatorService`] behind
//! whatever surface you run.

pub mod backend;
pub mod cache;
pub mod chunker;
pub mod config;
pub mod controller;
pub mod detector;
pub mod error;
pub mod generative;
pub mod langcode;
pub mod metrics;
pub mod optimizer;
pub mod output;
pub mod parallel;
pub mod progressive;
pub mod registry;
pub mod request;
pub mod scorer;
pub mod security;
pub mod specialized;

pub use backend::{BackendFamily, BackendHealth, BackendInfo, BackendStatus, ModelBackend};
pub use config::{load_config, Config};
pub use controller::{HealthReport, TranslatorService};
pub use error::{ApiError, ErrorKind, Result, TranslateError};
pub use progressive::{ProgressEvent, ProgressiveStream};
pub use request::{
    Method, TranslationMode, TranslationRequest, TranslationResult, UserPreference,
};
pub use scorer::{QualityGrade, QualityMetrics};
