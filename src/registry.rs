//! Backend lifecycle and selection.
//!
//! The registry owns every backend's `unloaded -> loading -> ready`
//! transitions. Loads are single-flight per backend id and serialized
//! globally; a failed load parks the backend behind an exponential
//! backoff before the next attempt. Eviction under the memory budget
//! waits out a drain grace period for backends still serving requests.
//!
//! Lock discipline: the entry-state mutex is never held across an
//! await. Only the per-id load lock (and the global one inside it) span
//! suspension points, and both are released before inference begins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::backend::{BackendFamily, BackendInfo, BackendStatus, ModelBackend};
use crate::config::Config;
use crate::error::{Result, TranslateError};
use crate::generative::GenerativeInstructed;
use crate::request::{TranslationRequest, UserPreference, MODEL_PREFERENCE_AUTO};
use crate::specialized::SpecializedSeq2Seq;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
struct EntryState {
    status: BackendStatus,
    last_used: Instant,
    consecutive_failures: u32,
    next_retry_at: Option<Instant>,
}

impl EntryState {
    fn new() -> Self {
        Self {
            status: BackendStatus::Unloaded,
            last_used: Instant::now(),
            consecutive_failures: 0,
            next_retry_at: None,
        }
    }
}

/// Shared handle to a ready backend. Holding a lease marks the backend
/// as serving, which defers its eviction until the drain grace expires.
pub struct BackendLease {
    backend: Arc<dyn ModelBackend>,
    active: Arc<AtomicUsize>,
}

impl std::fmt::Debug for BackendLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendLease")
            .field("backend_id", &self.backend.id())
            .finish()
    }
}

impl BackendLease {
    fn new(backend: Arc<dyn ModelBackend>, active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { backend, active }
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }
}

impl std::ops::Deref for BackendLease {
    type Target = dyn ModelBackend;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ModelRegistry {
    backends: HashMap<String, Arc<dyn ModelBackend>>,
    memory_mb: HashMap<String, u64>,
    entries: Mutex<HashMap<String, EntryState>>,
    load_locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
    active: HashMap<String, Arc<AtomicUsize>>,
    global_load_lock: tokio::sync::Mutex<()>,
    memory_budget_mb: u64,
    backoff_base: Duration,
    backoff_factor: u32,
    backoff_max: Duration,
    drain_grace: Duration,
    short_select_threshold: usize,
    default_backend: String,
}

impl ModelRegistry {
    /// Build a registry with the real HTTP-backed backends from config
    pub fn from_config(config: &Config) -> Self {
        let pool = config.concurrency.max_inflight;
        let backends: Vec<Arc<dyn ModelBackend>> = config
            .backends
            .iter()
            .map(|spec| match spec.family {
                BackendFamily::Specialized => {
                    Arc::new(SpecializedSeq2Seq::new(spec, pool)) as Arc<dyn ModelBackend>
                }
                BackendFamily::Generative => {
                    Arc::new(GenerativeInstructed::new(spec, pool)) as Arc<dyn ModelBackend>
                }
            })
            .collect();
        Self::with_backends(config, backends)
    }

    /// Build a registry around caller-supplied backends. Tests inject
    /// fresh registries with scripted backends through this.
    pub fn with_backends(config: &Config, backends: Vec<Arc<dyn ModelBackend>>) -> Self {
        let mut map = HashMap::new();
        let mut memory_mb = HashMap::new();
        let mut entries = HashMap::new();
        let mut load_locks = HashMap::new();
        let mut active = HashMap::new();

        for backend in backends {
            let id = backend.id().to_string();
            let declared = config
                .backend_spec(&id)
                .map(|s| s.load_params.memory_mb)
                .unwrap_or_else(|| backend.info().memory_class_mb);
            memory_mb.insert(id.clone(), declared);
            entries.insert(id.clone(), EntryState::new());
            load_locks.insert(id.clone(), Arc::new(tokio::sync::Mutex::new(())));
            active.insert(id.clone(), Arc::new(AtomicUsize::new(0)));
            map.insert(id, backend);
        }

        Self {
            backends: map,
            memory_mb,
            entries: Mutex::new(entries),
            load_locks,
            active,
            global_load_lock: tokio::sync::Mutex::new(()),
            memory_budget_mb: config.memory_budget_mb,
            backoff_base: Duration::from_secs(config.registry.load_backoff_base_s),
            backoff_factor: config.registry.load_backoff_factor.max(1),
            backoff_max: Duration::from_secs(config.registry.load_backoff_max_s),
            drain_grace: Duration::from_secs(config.registry.drain_grace_s),
            short_select_threshold: config.registry.short_select_threshold_chars,
            default_backend: config.default_backend.clone(),
        }
    }

    fn entry_status(&self, id: &str) -> Option<BackendStatus> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(id).map(|e| e.status)
    }

    /// Registry-authoritative status for one backend
    pub fn status(&self, id: &str) -> Option<BackendStatus> {
        self.entry_status(id)
    }

    /// Ids of backends currently ready, most recently used first
    pub fn ready_ids(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut ready: Vec<(&String, Instant)> = entries
            .iter()
            .filter(|(_, e)| e.status == BackendStatus::Ready)
            .map(|(id, e)| (id, e.last_used))
            .collect();
        ready.sort_by(|a, b| b.1.cmp(&a.1));
        ready.into_iter().map(|(id, _)| id.clone()).collect()
    }

    fn lease(&self, id: &str) -> BackendLease {
        BackendLease::new(
            Arc::clone(&self.backends[id]),
            Arc::clone(&self.active[id]),
        )
    }

    /// Return a ready backend, loading it first if necessary.
    ///
    /// Single-flight: concurrent callers for the same id block on the
    /// per-id lock while one of them performs the load, then all receive
    /// the same backend instance.
    pub async fn get_or_load(&self, id: &str) -> Result<BackendLease> {
        if !self.backends.contains_key(id) {
            return Err(TranslateError::InvalidRequest(format!(
                "unknown backend id: {id}"
            )));
        }

        // Fast path outside any async lock
        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let entry = entries.get_mut(id).expect("entry exists for known id");
            match entry.status {
                BackendStatus::Ready => {
                    entry.last_used = Instant::now();
                    drop(entries);
                    return Ok(self.lease(id));
                }
                BackendStatus::Failed => {
                    if let Some(at) = entry.next_retry_at {
                        if Instant::now() < at {
                            let wait = at.duration_since(Instant::now());
                            return Err(TranslateError::BackendUnavailable {
                                backend_id: id.to_string(),
                                reason: format!(
                                    "in failure backoff for another {}s",
                                    wait.as_secs().max(1)
                                ),
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        let id_lock = Arc::clone(&self.load_locks[id]);
        let _id_guard = id_lock.lock().await;

        // Someone else may have finished the load while we waited
        if self.entry_status(id) == Some(BackendStatus::Ready) {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.get_mut(id).expect("entry exists").last_used = Instant::now();
            drop(entries);
            return Ok(self.lease(id));
        }

        // We are the loader; loads are additionally serialized globally
        let _global_guard = self.global_load_lock.lock().await;
        self.make_room_for(id).await?;

        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.get_mut(id).expect("entry exists").status = BackendStatus::Loading;
        }
        info!(backend_id = id, "loading backend");

        let backend = Arc::clone(&self.backends[id]);
        let outcome = backend.load().await;

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get_mut(id).expect("entry exists");
        match outcome {
            Ok(()) => {
                entry.status = BackendStatus::Ready;
                entry.last_used = Instant::now();
                entry.consecutive_failures = 0;
                entry.next_retry_at = None;
                drop(entries);
                info!(backend_id = id, "backend ready");
                Ok(self.lease(id))
            }
            Err(e) => {
                entry.status = BackendStatus::Failed;
                entry.consecutive_failures += 1;
                let exponent = entry.consecutive_failures.saturating_sub(1).min(16);
                let delay = self
                    .backoff_base
                    .saturating_mul(self.backoff_factor.saturating_pow(exponent))
                    .min(self.backoff_max);
                entry.next_retry_at = Some(Instant::now() + delay);
                drop(entries);
                warn!(backend_id = id, error = %e, backoff_s = delay.as_secs(), "backend load failed");
                Err(e)
            }
        }
    }

    /// Park a backend in `failed` with backoff after a fatal runtime
    /// error observed outside the load path (e.g. the accelerator went
    /// away mid-inference). Subsequent `get_or_load` calls reject until
    /// the backoff elapses, then retry the load.
    pub fn mark_failed(&self, id: &str, reason: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = entries.get_mut(id) else {
            return;
        };
        entry.status = BackendStatus::Failed;
        entry.consecutive_failures += 1;
        let exponent = entry.consecutive_failures.saturating_sub(1).min(16);
        let delay = self
            .backoff_base
            .saturating_mul(self.backoff_factor.saturating_pow(exponent))
            .min(self.backoff_max);
        entry.next_retry_at = Some(Instant::now() + delay);
        warn!(backend_id = id, reason, backoff_s = delay.as_secs(), "backend marked failed");
    }

    /// Evict least-recently-used ready backends until `id` fits in the
    /// memory budget. A backend still holding leases gets the drain
    /// grace period before being unloaded anyway.
    async fn make_room_for(&self, id: &str) -> Result<()> {
        let needed = self.memory_mb.get(id).copied().unwrap_or(0);

        loop {
            let victim = {
                let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
                let used: u64 = entries
                    .iter()
                    .filter(|(_, e)| e.status == BackendStatus::Ready)
                    .map(|(eid, _)| self.memory_mb.get(eid).copied().unwrap_or(0))
                    .sum();
                if used + needed <= self.memory_budget_mb {
                    return Ok(());
                }
                entries
                    .iter()
                    .filter(|(_, e)| e.status == BackendStatus::Ready)
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(eid, _)| eid.clone())
            };

            let Some(victim) = victim else {
                // Nothing evictable; proceed and let the runtime decide
                return Ok(());
            };
            self.evict(&victim).await?;
        }
    }

    async fn evict(&self, id: &str) -> Result<()> {
        let active = Arc::clone(&self.active[id]);
        let deadline = Instant::now() + self.drain_grace;
        while active.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        if active.load(Ordering::SeqCst) > 0 {
            warn!(backend_id = id, "drain grace elapsed, evicting while busy");
        }

        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.get_mut(id).expect("entry exists").status = BackendStatus::Unloading;
        }
        let result = self.backends[id].unload().await;
        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.get_mut(id).expect("entry exists").status = BackendStatus::Unloaded;
        }
        info!(backend_id = id, "backend evicted");
        result
    }

    /// Explicit unload, same drain discipline as eviction
    pub async fn unload(&self, id: &str) -> Result<()> {
        if !self.backends.contains_key(id) {
            return Err(TranslateError::InvalidRequest(format!(
                "unknown backend id: {id}"
            )));
        }
        let id_lock = Arc::clone(&self.load_locks[id]);
        let _id_guard = id_lock.lock().await;

        if self.entry_status(id) != Some(BackendStatus::Ready) {
            return Ok(());
        }
        self.evict(id).await
    }

    /// Registry view of every backend, status merged in
    pub fn list(&self) -> Vec<BackendInfo> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut infos: Vec<BackendInfo> = self
            .backends
            .values()
            .map(|b| {
                let mut info = b.info();
                if let Some(entry) = entries.get(&info.id) {
                    info.status = entry.status;
                }
                info
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn loaded_count(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .filter(|e| e.status == BackendStatus::Ready)
            .count()
    }

    /// Languages a specific backend (or the union of all) can serve
    pub fn languages(&self, backend_id: Option<&str>) -> Result<Vec<String>> {
        match backend_id {
            Some(id) => {
                let backend = self.backends.get(id).ok_or_else(|| {
                    TranslateError::InvalidRequest(format!("unknown backend id: {id}"))
                })?;
                Ok(backend
                    .supported_languages()
                    .iter()
                    .map(|s| s.to_string())
                    .collect())
            }
            None => {
                let mut all: Vec<String> = self
                    .backends
                    .values()
                    .flat_map(|b| b.supported_languages())
                    .map(|s| s.to_string())
                    .collect();
                all.sort();
                all.dedup();
                Ok(all)
            }
        }
    }

    fn first_of_family(&self, family: BackendFamily) -> Option<&Arc<dyn ModelBackend>> {
        let mut ids: Vec<&String> = self.backends.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| &self.backends[id])
            .find(|b| b.family() == family)
    }

    /// Pick a backend id for the request. `source` and `target` are
    /// already-resolved public codes.
    pub fn select(
        &self,
        request: &TranslationRequest,
        source: &str,
        target: &str,
    ) -> Result<String> {
        if request.model_preference != MODEL_PREFERENCE_AUTO {
            let id = &request.model_preference;
            let backend = self.backends.get(id).ok_or_else(|| {
                TranslateError::InvalidRequest(format!("unknown backend id: {id}"))
            })?;
            // Explicit preference: an unsupported pair surfaces, no fallback
            if !backend.supports_pair(source, target) {
                return Err(TranslateError::LanguagePairUnsupported {
                    backend_id: id.clone(),
                    source_lang: source.to_string(),
                    target: target.to_string(),
                });
            }
            return Ok(id.clone());
        }

        let specialized = self.first_of_family(BackendFamily::Specialized);
        let generative = self.first_of_family(BackendFamily::Generative);

        // Short inputs and fast callers go to the cheap model first;
        // only quality callers with real documents lead with the LLM
        let text_len = request.text.chars().count();
        let prefer_specialized = text_len <= self.short_select_threshold
            || !matches!(request.user_preference, UserPreference::Quality);

        let ordered: Vec<&Arc<dyn ModelBackend>> = if prefer_specialized {
            [specialized, generative].into_iter().flatten().collect()
        } else {
            [generative, specialized].into_iter().flatten().collect()
        };

        for backend in &ordered {
            if backend.supports_pair(source, target) {
                return Ok(backend.id().to_string());
            }
        }

        // Fall back to the configured default if the family scan found
        // nothing usable (e.g. a single-backend deployment)
        if let Some(backend) = self.backends.get(&self.default_backend) {
            if backend.supports_pair(source, target) {
                return Ok(self.default_backend.clone());
            }
        }

        Err(TranslateError::LanguagePairUnsupported {
            backend_id: MODEL_PREFERENCE_AUTO.into(),
            source_lang: source.to_string(),
            target: target.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockBackend;
    use crate::request::TranslationRequest;

    fn config() -> Config {
        Config::default()
    }

    fn registry_with(backends: Vec<Arc<dyn ModelBackend>>) -> ModelRegistry {
        ModelRegistry::with_backends(&config(), backends)
    }

    #[tokio::test]
    async fn single_flight_load() {
        let mock = Arc::new(
            MockBackend::new("specialized", BackendFamily::Specialized).with_load_delay(50),
        );
        let registry = Arc::new(registry_with(vec![mock.clone()]));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.get_or_load("specialized").await.map(|_| ())
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(mock.load_calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.loaded_count(), 1);
    }

    #[tokio::test]
    async fn unknown_backend_is_invalid_request() {
        let registry = registry_with(vec![]);
        let err = registry.get_or_load("nope").await.unwrap_err();
        assert!(matches!(err, TranslateError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn failed_load_enters_backoff() {
        let mock = Arc::new(
            MockBackend::new("specialized", BackendFamily::Specialized).with_failing_load(),
        );
        let registry = registry_with(vec![mock.clone()]);

        let first = registry.get_or_load("specialized").await;
        assert!(first.is_err());
        assert_eq!(mock.load_calls.load(Ordering::SeqCst), 1);

        // Second attempt inside the backoff window does not touch load()
        let second = registry.get_or_load("specialized").await.unwrap_err();
        assert!(matches!(second, TranslateError::BackendUnavailable { .. }));
        assert_eq!(mock.load_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn memory_pressure_evicts_lru() {
        let mut config = config();
        config.memory_budget_mb = 3000;
        config.registry.drain_grace_s = 0;
        // Declared costs come from the config specs; both fit alone,
        // never together
        config.backends[0].load_params.memory_mb = 2048;
        config.backends[1].load_params.memory_mb = 2048;

        let a = Arc::new(MockBackend::new("specialized", BackendFamily::Specialized));
        let b = Arc::new(MockBackend::new("generative", BackendFamily::Generative));
        let registry = ModelRegistry::with_backends(&config, vec![a.clone(), b.clone()]);

        registry.get_or_load("specialized").await.unwrap();
        assert_eq!(registry.loaded_count(), 1);

        registry.get_or_load("generative").await.unwrap();
        assert_eq!(registry.loaded_count(), 1, "first backend was evicted");

        let statuses: Vec<(String, BackendStatus)> = registry
            .list()
            .into_iter()
            .map(|i| (i.id, i.status))
            .collect();
        assert!(statuses.contains(&("specialized".into(), BackendStatus::Unloaded)));
        assert!(statuses.contains(&("generative".into(), BackendStatus::Ready)));
    }

    #[tokio::test]
    async fn mark_failed_parks_backend_behind_backoff() {
        let mock = Arc::new(MockBackend::new("specialized", BackendFamily::Specialized));
        let registry = registry_with(vec![mock.clone()]);

        registry.get_or_load("specialized").await.unwrap();
        registry.mark_failed("specialized", "CUDA error: device-side assert");

        let err = registry.get_or_load("specialized").await.unwrap_err();
        assert!(matches!(err, TranslateError::BackendUnavailable { .. }));
        // The backend was never asked to reload inside the backoff window
        assert_eq!(mock.load_calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.status("specialized"), Some(BackendStatus::Failed));
    }

    #[tokio::test]
    async fn explicit_unload_transitions_to_unloaded() {
        let mock = Arc::new(MockBackend::new("specialized", BackendFamily::Specialized));
        let registry = registry_with(vec![mock]);

        registry.get_or_load("specialized").await.unwrap();
        assert_eq!(registry.loaded_count(), 1);
        registry.unload("specialized").await.unwrap();
        assert_eq!(registry.loaded_count(), 0);
        // Unloading something not ready is a no-op
        registry.unload("specialized").await.unwrap();
    }

    #[tokio::test]
    async fn selection_prefers_specialized_for_short_or_fast() {
        let registry = registry_with(vec![
            Arc::new(MockBackend::new("specialized", BackendFamily::Specialized)),
            Arc::new(MockBackend::new("generative", BackendFamily::Generative)),
        ]);

        let long_text = "A sentence that keeps going. ".repeat(10);

        let mut request = TranslationRequest::simple(&long_text, "en", "ru");
        request.user_preference = UserPreference::Fast;
        assert_eq!(registry.select(&request, "en", "ru").unwrap(), "specialized");

        request.user_preference = UserPreference::Quality;
        assert_eq!(registry.select(&request, "en", "ru").unwrap(), "generative");

        request.user_preference = UserPreference::Balanced;
        assert_eq!(registry.select(&request, "en", "ru").unwrap(), "specialized");

        // Short text prefers the specialized model even for quality callers
        let mut short = TranslationRequest::simple("Hi there", "en", "ru");
        short.user_preference = UserPreference::Quality;
        assert_eq!(registry.select(&short, "en", "ru").unwrap(), "specialized");
    }

    #[tokio::test]
    async fn selection_falls_over_on_unsupported_pair() {
        let registry = registry_with(vec![
            Arc::new(MockBackend::new("specialized", BackendFamily::Specialized)),
            Arc::new(MockBackend::new("generative", BackendFamily::Generative)),
        ]);

        // Specialized lacks Yoruba; auto selection falls to generative
        let request = TranslationRequest::simple("Hello friend", "en", "yo");
        assert_eq!(registry.select(&request, "en", "yo").unwrap(), "generative");
    }

    #[tokio::test]
    async fn explicit_preference_surfaces_unsupported_pair() {
        let registry = registry_with(vec![
            Arc::new(MockBackend::new("specialized", BackendFamily::Specialized)),
            Arc::new(MockBackend::new("generative", BackendFamily::Generative)),
        ]);

        let mut request = TranslationRequest::simple("Hello", "en", "yo");
        request.model_preference = "specialized".into();
        let err = registry.select(&request, "en", "yo").unwrap_err();
        assert!(matches!(
            err,
            TranslateError::LanguagePairUnsupported { .. }
        ));
    }

    #[tokio::test]
    async fn lease_defers_eviction_until_drop() {
        let mut config = config();
        config.memory_budget_mb = 2048;
        config.registry.drain_grace_s = 0;
        config.backends[0].load_params.memory_mb = 2048;
        config.backends[1].load_params.memory_mb = 2048;

        let registry = Arc::new(ModelRegistry::with_backends(
            &config,
            vec![
                Arc::new(MockBackend::new("specialized", BackendFamily::Specialized))
                    as Arc<dyn ModelBackend>,
                Arc::new(MockBackend::new("generative", BackendFamily::Generative)),
            ],
        ));

        let lease = registry.get_or_load("specialized").await.unwrap();
        drop(lease);
        // With the lease dropped, eviction proceeds immediately
        registry.get_or_load("generative").await.unwrap();
        assert_eq!(registry.loaded_count(), 1);
    }
}
