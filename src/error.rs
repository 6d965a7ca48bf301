use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Error kinds exposed on the wire, for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Validation failure - fix the request
    InvalidRequest,
    /// Language code not known to any backend family
    UnsupportedLanguage,
    /// Requested language pair not served by the selected backend
    LanguagePairUnsupported,
    /// Backend not reachable or not ready - retry later
    BackendUnavailable,
    /// Backend call exceeded its timeout - retry later
    BackendTimeout,
    /// Backend returned a malformed or fatal response
    BackendInternal,
    /// More than half of the chunks failed permanently
    ChunkTranslationFailed,
    /// Overall request deadline elapsed
    DeadlineExceeded,
    /// Cache subsystem failure - never fails a request, logged and bypassed
    Cache,
    /// Configuration file problem
    Config,
    /// Unexpected internal state
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnsupportedLanguage => "unsupported_language",
            Self::LanguagePairUnsupported => "language_pair_unsupported",
            Self::BackendUnavailable => "backend_unavailable",
            Self::BackendTimeout => "backend_timeout",
            Self::BackendInternal => "backend_internal",
            Self::ChunkTranslationFailed => "chunk_translation_failed",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cache => "cache",
            Self::Config => "config",
            Self::Internal => "internal",
        }
    }

    /// Actionable advice attached to user-visible errors
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidRequest => Some("Check text length and language fields"),
            Self::UnsupportedLanguage => Some("Call languages() for the supported set"),
            Self::LanguagePairUnsupported => {
                Some("Retry with model_preference=auto to allow fallback selection")
            }
            Self::BackendUnavailable => Some("Backend is loading or down. Retry with backoff"),
            Self::BackendTimeout => Some("Inference took too long. Retry or reduce text size"),
            Self::BackendInternal => None,
            Self::ChunkTranslationFailed => Some("Backend is degraded. Retry later"),
            Self::DeadlineExceeded => {
                Some("Raise the overall deadline or use user_preference=fast")
            }
            Self::Cache => Some("Check disk space and permissions for the cache directory"),
            Self::Config => Some("Fix configuration file syntax or values"),
            Self::Internal => None,
        }
    }

    /// Whether a request failing with this kind is worth retrying as-is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable | Self::BackendTimeout | Self::DeadlineExceeded
        )
    }
}

#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported language code: {code}")]
    UnsupportedLanguage { code: String },

    #[error("language pair {source_lang}->{target} not supported by backend {backend_id}")]
    LanguagePairUnsupported {
        backend_id: String,
        source_lang: String,
        target: String,
    },

    #[error("backend {backend_id} unavailable: {reason}")]
    BackendUnavailable { backend_id: String, reason: String },

    #[error("backend {backend_id} timed out after {elapsed_ms}ms")]
    BackendTimeout { backend_id: String, elapsed_ms: u64 },

    #[error("backend {backend_id} internal error: {message}")]
    BackendInternal { backend_id: String, message: String },

    #[error("{failed} of {total} chunks failed, partial translation discarded")]
    ChunkTranslationFailed { failed: usize, total: usize },

    #[error("request deadline of {deadline_s}s exceeded")]
    DeadlineExceeded { deadline_s: u64 },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranslateError {
    /// Classify into a wire-level kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::UnsupportedLanguage { .. } => ErrorKind::UnsupportedLanguage,
            Self::LanguagePairUnsupported { .. } => ErrorKind::LanguagePairUnsupported,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::BackendTimeout { .. } => ErrorKind::BackendTimeout,
            Self::BackendInternal { .. } => ErrorKind::BackendInternal,
            Self::ChunkTranslationFailed { .. } => ErrorKind::ChunkTranslationFailed,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::Cache(_) => ErrorKind::Cache,
            Self::Config(_) => ErrorKind::Config,
            Self::Http(e) => {
                if e.is_timeout() {
                    ErrorKind::BackendTimeout
                } else if e.is_connect() {
                    ErrorKind::BackendUnavailable
                } else if let Some(status) = e.status() {
                    Self::kind_from_status(status)
                } else {
                    ErrorKind::Internal
                }
            }
            Self::Json(_) => ErrorKind::BackendInternal,
            Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Transient errors are retried inside the chunk translator
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::BackendUnavailable | ErrorKind::BackendTimeout
        )
    }

    fn kind_from_status(status: StatusCode) -> ErrorKind {
        match status.as_u16() {
            408 | 504 => ErrorKind::BackendTimeout,
            429 | 502 | 503 => ErrorKind::BackendUnavailable,
            _ => ErrorKind::BackendInternal,
        }
    }

    /// Map an inference-runtime HTTP status to a typed error
    pub fn from_status(backend_id: &str, status: StatusCode) -> Self {
        match Self::kind_from_status(status) {
            ErrorKind::BackendTimeout => Self::BackendTimeout {
                backend_id: backend_id.to_string(),
                elapsed_ms: 0,
            },
            ErrorKind::BackendUnavailable => Self::BackendUnavailable {
                backend_id: backend_id.to_string(),
                reason: format!("HTTP {status}"),
            },
            _ => Self::BackendInternal {
                backend_id: backend_id.to_string(),
                message: format!("HTTP {status}"),
            },
        }
    }
}

/// User-visible structured failure, the only error shape callers see
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl From<&TranslateError> for ApiError {
    fn from(err: &TranslateError) -> Self {
        let kind = err.kind();
        Self {
            kind,
            message: err.to_string(),
            retryable: kind.is_retryable(),
            hint: kind.hint().map(String::from),
        }
    }
}

pub type Result<T> = std::result::Result<T, TranslateError>;
