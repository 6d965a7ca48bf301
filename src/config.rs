use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::backend::BackendFamily;

const CONFIG_FILENAME: &str = ".adaptive-translator.json";

/// Declaration of one translation backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    pub id: String,
    pub family: BackendFamily,
    /// Base URL of the inference runtime serving this model
    pub artifact_ref: String,
    #[serde(default)]
    pub load_params: LoadParams,
}

/// Parameters handed to the inference runtime at load time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadParams {
    /// Declared resident cost, charged against the registry memory budget
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    /// Model identifier passed to the runtime (generative family)
    #[serde(default)]
    pub model: Option<String>,

    /// Beam width for seq2seq decoding (specialized family)
    #[serde(default = "default_beam_size")]
    pub beam_size: u32,
}

const DEFAULT_MEMORY_MB: u64 = 2048;
const DEFAULT_BEAM_SIZE: u32 = 4;

fn default_memory_mb() -> u64 {
    DEFAULT_MEMORY_MB
}
fn default_beam_size() -> u32 {
    DEFAULT_BEAM_SIZE
}

impl Default for LoadParams {
    fn default() -> Self {
        Self {
            memory_mb: DEFAULT_MEMORY_MB,
            model: None,
            beam_size: DEFAULT_BEAM_SIZE,
        }
    }
}

/// Per-request limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    /// Whole-request deadline in seconds (default: 120)
    #[serde(default = "default_overall_deadline_s")]
    pub overall_deadline_s: u64,

    /// Hard cap on input length in characters (default: 10000)
    #[serde(default = "default_hard_text_cap")]
    pub hard_text_cap: usize,

    /// Texts at or under this length are translated in one call (default: 500)
    #[serde(default = "default_direct_threshold")]
    pub direct_threshold_chars: usize,
}

const DEFAULT_OVERALL_DEADLINE_S: u64 = 120;
const DEFAULT_HARD_TEXT_CAP: usize = 10_000;
const DEFAULT_DIRECT_THRESHOLD: usize = 500;

fn default_overall_deadline_s() -> u64 {
    DEFAULT_OVERALL_DEADLINE_S
}
fn default_hard_text_cap() -> usize {
    DEFAULT_HARD_TEXT_CAP
}
fn default_direct_threshold() -> usize {
    DEFAULT_DIRECT_THRESHOLD
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            overall_deadline_s: DEFAULT_OVERALL_DEADLINE_S,
            hard_text_cap: DEFAULT_HARD_TEXT_CAP,
            direct_threshold_chars: DEFAULT_DIRECT_THRESHOLD,
        }
    }
}

/// Concurrency limits for backend inference
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrencyConfig {
    /// Simultaneous inference calls across the process (default: 5)
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
}

const DEFAULT_MAX_INFLIGHT: usize = 5;

fn default_max_inflight() -> usize {
    DEFAULT_MAX_INFLIGHT
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_inflight: DEFAULT_MAX_INFLIGHT,
        }
    }
}

/// Semantic chunker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkerConfig {
    /// Chunk size used when no optimization runs (default: 500)
    #[serde(default = "default_max_chunk_size")]
    pub default_max_chunk_size: usize,
}

const DEFAULT_MAX_CHUNK_SIZE: usize = 500;

fn default_max_chunk_size() -> usize {
    DEFAULT_MAX_CHUNK_SIZE
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            default_max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

/// Binary-search optimizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerConfig {
    #[serde(default = "default_optimizer_min_size")]
    pub min_size: usize,

    #[serde(default = "default_optimizer_max_size")]
    pub max_size: usize,

    #[serde(default = "default_optimizer_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_optimizer_quality_threshold")]
    pub quality_threshold: f64,

    #[serde(default = "default_optimizer_time_budget_s")]
    pub time_budget_s: u64,
}

const DEFAULT_OPTIMIZER_MIN_SIZE: usize = 50;
const DEFAULT_OPTIMIZER_MAX_SIZE: usize = 2000;
const DEFAULT_OPTIMIZER_MAX_ITERATIONS: u32 = 8;
const DEFAULT_OPTIMIZER_QUALITY_THRESHOLD: f64 = 0.85;
const DEFAULT_OPTIMIZER_TIME_BUDGET_S: u64 = 5;

fn default_optimizer_min_size() -> usize {
    DEFAULT_OPTIMIZER_MIN_SIZE
}
fn default_optimizer_max_size() -> usize {
    DEFAULT_OPTIMIZER_MAX_SIZE
}
fn default_optimizer_max_iterations() -> u32 {
    DEFAULT_OPTIMIZER_MAX_ITERATIONS
}
fn default_optimizer_quality_threshold() -> f64 {
    DEFAULT_OPTIMIZER_QUALITY_THRESHOLD
}
fn default_optimizer_time_budget_s() -> u64 {
    DEFAULT_OPTIMIZER_TIME_BUDGET_S
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_OPTIMIZER_MIN_SIZE,
            max_size: DEFAULT_OPTIMIZER_MAX_SIZE,
            max_iterations: DEFAULT_OPTIMIZER_MAX_ITERATIONS,
            quality_threshold: DEFAULT_OPTIMIZER_QUALITY_THRESHOLD,
            time_budget_s: DEFAULT_OPTIMIZER_TIME_BUDGET_S,
        }
    }
}

/// Cache settings for both the size cache and the optional result cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// TTL of optimal-chunk-size entries in days (default: 7)
    #[serde(default = "default_size_ttl_days")]
    pub size_ttl_days: u32,

    /// TTL of full translation results in seconds. None disables the result cache
    #[serde(default)]
    pub result_ttl_s: Option<u64>,

    /// In-memory entry cap, LRU-evicted beyond this (default: 100000)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

const DEFAULT_SIZE_TTL_DAYS: u32 = 7;
const DEFAULT_MAX_ENTRIES: usize = 100_000;

fn default_size_ttl_days() -> u32 {
    DEFAULT_SIZE_TTL_DAYS
}
fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size_ttl_days: DEFAULT_SIZE_TTL_DAYS,
            result_ttl_s: None,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Registry load/unload discipline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Base delay before retrying a failed load, seconds (default: 1)
    #[serde(default = "default_backoff_base_s")]
    pub load_backoff_base_s: u64,

    /// Backoff multiplier per consecutive failure (default: 2)
    #[serde(default = "default_backoff_factor")]
    pub load_backoff_factor: u32,

    /// Backoff ceiling, seconds (default: 300)
    #[serde(default = "default_backoff_max_s")]
    pub load_backoff_max_s: u64,

    /// Grace period before evicting a backend still serving requests (default: 30)
    #[serde(default = "default_drain_grace_s")]
    pub drain_grace_s: u64,

    /// Texts at or under this length prefer the specialized backend (default: 200)
    #[serde(default = "default_short_select_threshold")]
    pub short_select_threshold_chars: usize,
}

const DEFAULT_BACKOFF_BASE_S: u64 = 1;
const DEFAULT_BACKOFF_FACTOR: u32 = 2;
const DEFAULT_BACKOFF_MAX_S: u64 = 300;
const DEFAULT_DRAIN_GRACE_S: u64 = 30;
const DEFAULT_SHORT_SELECT_THRESHOLD: usize = 200;

fn default_backoff_base_s() -> u64 {
    DEFAULT_BACKOFF_BASE_S
}
fn default_backoff_factor() -> u32 {
    DEFAULT_BACKOFF_FACTOR
}
fn default_backoff_max_s() -> u64 {
    DEFAULT_BACKOFF_MAX_S
}
fn default_drain_grace_s() -> u64 {
    DEFAULT_DRAIN_GRACE_S
}
fn default_short_select_threshold() -> usize {
    DEFAULT_SHORT_SELECT_THRESHOLD
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            load_backoff_base_s: DEFAULT_BACKOFF_BASE_S,
            load_backoff_factor: DEFAULT_BACKOFF_FACTOR,
            load_backoff_max_s: DEFAULT_BACKOFF_MAX_S,
            drain_grace_s: DEFAULT_DRAIN_GRACE_S,
            short_select_threshold_chars: DEFAULT_SHORT_SELECT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendSpec>,

    #[serde(default = "default_default_backend")]
    pub default_backend: String,

    /// Total declared memory available to ready backends (default: 16384)
    #[serde(default = "default_memory_budget_mb")]
    pub memory_budget_mb: u64,

    #[serde(default)]
    pub request: RequestConfig,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    #[serde(default)]
    pub chunker: ChunkerConfig,

    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub registry: RegistryConfig,
}

const DEFAULT_MEMORY_BUDGET_MB: u64 = 16_384;

fn default_memory_budget_mb() -> u64 {
    DEFAULT_MEMORY_BUDGET_MB
}
fn default_default_backend() -> String {
    "specialized".into()
}

fn default_backends() -> Vec<BackendSpec> {
    vec![
        BackendSpec {
            id: "specialized".into(),
            family: BackendFamily::Specialized,
            artifact_ref: "http://127.0.0.1:8801".into(),
            load_params: LoadParams {
                memory_mb: 2048,
                model: None,
                beam_size: DEFAULT_BEAM_SIZE,
            },
        },
        BackendSpec {
            id: "generative".into(),
            family: BackendFamily::Generative,
            artifact_ref: "http://127.0.0.1:11434".into(),
            load_params: LoadParams {
                memory_mb: 8192,
                model: Some("aya:8b".into()),
                beam_size: DEFAULT_BEAM_SIZE,
            },
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backends: default_backends(),
            default_backend: default_default_backend(),
            memory_budget_mb: DEFAULT_MEMORY_BUDGET_MB,
            request: RequestConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            chunker: ChunkerConfig::default(),
            optimizer: OptimizerConfig::default(),
            cache: CacheConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl Config {
    /// Look up a backend declaration by id
    pub fn backend_spec(&self, id: &str) -> Option<&BackendSpec> {
        self.backends.iter().find(|b| b.id == id)
    }
}

/// Load configuration from file, applying environment variable overrides
pub fn load_config() -> Config {
    let mut config: Config = find_config_file()
        .and_then(|path| {
            let content = std::fs::read_to_string(&path).ok()?;
            match serde_json::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "config parse error, using defaults");
                    None
                }
            }
        })
        .unwrap_or_default();

    // Apply environment variable overrides
    if let Ok(val) = std::env::var("ADAPTIVE_TRANSLATOR_DEFAULT_BACKEND") {
        config.default_backend = val;
    }
    if let Ok(val) = std::env::var("ADAPTIVE_TRANSLATOR_MAX_INFLIGHT") {
        if let Ok(n) = val.parse::<usize>() {
            config.concurrency.max_inflight = n.max(1);
        }
    }
    if let Ok(val) = std::env::var("ADAPTIVE_TRANSLATOR_DEADLINE_S") {
        if let Ok(n) = val.parse::<u64>() {
            config.request.overall_deadline_s = n;
        }
    }

    config
}

/// Search for config file in standard locations
fn find_config_file() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("ADAPTIVE_TRANSLATOR_CONFIG") {
        let path = PathBuf::from(explicit);
        if path.exists() {
            return Some(path);
        }
    }

    let search_paths = [
        std::env::current_dir().ok(),
        dirs::home_dir(),
        dirs::config_dir().map(|p| p.join("adaptive-translator")),
    ];

    for base in search_paths.into_iter().flatten() {
        let config_path = base.join(CONFIG_FILENAME);
        if config_path.exists() {
            return Some(config_path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = Config::default();
        assert_eq!(config.request.overall_deadline_s, 120);
        assert_eq!(config.request.hard_text_cap, 10_000);
        assert_eq!(config.request.direct_threshold_chars, 500);
        assert_eq!(config.concurrency.max_inflight, 5);
        assert_eq!(config.chunker.default_max_chunk_size, 500);
        assert_eq!(config.optimizer.min_size, 50);
        assert_eq!(config.optimizer.max_size, 2000);
        assert_eq!(config.optimizer.max_iterations, 8);
        assert_eq!(config.optimizer.time_budget_s, 5);
        assert_eq!(config.cache.size_ttl_days, 7);
        assert!(config.cache.result_ttl_s.is_none());
        assert_eq!(config.cache.max_entries, 100_000);
        assert_eq!(config.registry.load_backoff_base_s, 1);
        assert_eq!(config.registry.load_backoff_max_s, 300);
        assert_eq!(config.registry.drain_grace_s, 30);
    }

    #[test]
    fn default_backends_cover_both_families() {
        let config = Config::default();
        assert_eq!(config.backends.len(), 2);
        assert!(config.backend_spec("specialized").is_some());
        assert!(config.backend_spec("generative").is_some());
        assert_eq!(config.default_backend, "specialized");
    }

    #[test]
    fn deserialize_partial() {
        let json = r#"{"memoryBudgetMb": 4096, "optimizer": {"maxIterations": 4}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.memory_budget_mb, 4096);
        assert_eq!(config.optimizer.max_iterations, 4);
        assert_eq!(config.optimizer.min_size, 50); // default
        assert_eq!(config.request.overall_deadline_s, 120); // default
    }

    #[test]
    fn deserialize_backend_spec() {
        let json = r#"{
            "id": "nllb",
            "family": "specialized",
            "artifactRef": "http://localhost:9000",
            "loadParams": {"memoryMb": 4096, "beamSize": 5}
        }"#;
        let spec: BackendSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.id, "nllb");
        assert_eq!(spec.load_params.memory_mb, 4096);
        assert_eq!(spec.load_params.beam_size, 5);
        assert!(spec.load_params.model.is_none());
    }

    #[test]
    fn result_cache_disabled_by_default() {
        let json = r#"{}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.cache.result_ttl_s.is_none());

        let json = r#"{"cache": {"resultTtlS": 600}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.cache.result_ttl_s, Some(600));
    }
}
