//! The model backend capability.
//!
//! Every translation engine, specialized seq2seq or generative LLM, is
//! driven through [`ModelBackend`]. Backends are read-shared behind an
//! `Arc`; `load`/`unload` are only ever called by the registry, which
//! serializes them per backend id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFamily {
    /// Encoder-decoder translator with a fixed native code scheme
    Specialized,
    /// Instructed multilingual LLM prompted with a stable template
    Generative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Unloaded,
    Loading,
    Ready,
    Failed,
    Unloading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendHealth {
    Ok,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendInfo {
    pub id: String,
    pub family: BackendFamily,
    pub supported_languages: Vec<String>,
    pub native_code_scheme: String,
    pub context_limit_tokens: u32,
    pub memory_class_mb: u64,
    pub status: BackendStatus,
}

/// Raw inference output before assembly
#[derive(Debug, Clone)]
pub struct BackendOutput {
    pub text: String,
    /// Log-prob-derived score when the runtime reports one
    pub confidence: Option<f64>,
}

/// Lock-free status holder shared between a backend and its callers
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(status: BackendStatus) -> Self {
        Self(AtomicU8::new(Self::encode(status)))
    }

    pub fn get(&self) -> BackendStatus {
        Self::decode(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, status: BackendStatus) {
        self.0.store(Self::encode(status), Ordering::Release);
    }

    fn encode(status: BackendStatus) -> u8 {
        match status {
            BackendStatus::Unloaded => 0,
            BackendStatus::Loading => 1,
            BackendStatus::Ready => 2,
            BackendStatus::Failed => 3,
            BackendStatus::Unloading => 4,
        }
    }

    fn decode(raw: u8) -> BackendStatus {
        match raw {
            1 => BackendStatus::Loading,
            2 => BackendStatus::Ready,
            3 => BackendStatus::Failed,
            4 => BackendStatus::Unloading,
            _ => BackendStatus::Unloaded,
        }
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new(BackendStatus::Unloaded)
    }
}

/// Uniform capability over heterogeneous translation engines.
///
/// `translate` and `detect_language` take and return public language
/// codes; conversion to the backend-native scheme happens inside the
/// implementation via the code normalizer.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn id(&self) -> &str;

    fn family(&self) -> BackendFamily;

    /// Translate one piece of text between public-coded languages
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<BackendOutput>;

    /// Authoritative language detection, returning a public code
    async fn detect_language(&self, text: &str) -> Result<String>;

    fn supported_languages(&self) -> Vec<&'static str>;

    fn info(&self) -> BackendInfo;

    async fn health(&self) -> BackendHealth;

    /// Bring model weights up in the inference runtime. Serialized by the
    /// registry; implementations update their status cell.
    async fn load(&self) -> Result<()>;

    async fn unload(&self) -> Result<()>;

    fn supports_pair(&self, source: &str, target: &str) -> bool {
        let langs = self.supported_languages();
        langs.contains(&source) && langs.contains(&target)
    }
}

/// Shared HTTP client tuned for a local inference runtime.
///
/// Connection reuse matters here: chunked requests issue many small
/// calls against the same host, so keep-alive and a warm pool dominate
/// per-call latency.
pub fn http_client(timeout: Duration, pool_size: usize) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(pool_size + 2)
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .gzip(true)
        .brotli(true)
        .build()
        .unwrap_or_default()
}
