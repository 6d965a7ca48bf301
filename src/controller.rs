//! The adaptive translation controller.
//!
//! One entry point drives every API shape: validate, resolve the source
//! language, pick a backend, then translate directly, semantically, or
//! through the chunk-size optimizer. Progressive mode streams per-chunk
//! events through the same pipeline.
//!
//! Cache failures and scoring anomalies never fail a request; only
//! validation, backend exhaustion, and the overall deadline do.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{BackendInfo, BackendStatus, ModelBackend};
use crate::cache::{result_key, MemoryCache};
use crate::chunker::{self, Chunk};
use crate::config::Config;
use crate::detector;
use crate::error::{Result, TranslateError};
use crate::langcode;
use crate::metrics::{MetricsSink, MetricsSnapshot};
use crate::optimizer::SizeOptimizer;
use crate::parallel::{ChunkJob, ChunkResults, ChunkTranslator};
use crate::progressive::{self, ProgressEvent, ProgressiveStream, DEFAULT_EVENT_BUFFER};
use crate::registry::ModelRegistry;
use crate::request::{
    Method, TranslationMode, TranslationRequest, TranslationResult, UserPreference,
};
use crate::scorer::{self, QualityGrade, QualityMetrics};
use crate::security;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub backends_loaded: usize,
}

pub struct TranslatorService {
    config: Config,
    registry: Arc<ModelRegistry>,
    translator: ChunkTranslator,
    optimizer: SizeOptimizer,
    size_cache: MemoryCache,
    result_cache: Option<MemoryCache>,
    #[cfg(feature = "persist-cache")]
    persistent: Option<crate::cache::PersistentCache>,
    metrics: MetricsSink,
}

impl TranslatorService {
    /// Production construction: HTTP-backed backends from config
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ModelRegistry::from_config(&config));
        Self::assemble(config, registry, true)
    }

    /// Test construction around an injected registry; never touches disk
    pub fn with_registry(config: Config, registry: ModelRegistry) -> Self {
        Self::assemble(config, Arc::new(registry), false)
    }

    fn assemble(config: Config, registry: Arc<ModelRegistry>, open_disk: bool) -> Self {
        let result_cache = config
            .cache
            .result_ttl_s
            .map(|_| MemoryCache::new(config.cache.max_entries));

        #[cfg(feature = "persist-cache")]
        let persistent = if open_disk && config.cache.result_ttl_s.is_some() {
            match crate::cache::PersistentCache::open_default() {
                Ok(db) => Some(db),
                Err(e) => {
                    warn!(error = %e, "persistent cache unavailable, continuing without it");
                    None
                }
            }
        } else {
            None
        };
        #[cfg(not(feature = "persist-cache"))]
        let _ = open_disk;

        Self {
            translator: ChunkTranslator::new(config.concurrency.max_inflight),
            optimizer: SizeOptimizer::new(&config.optimizer, config.cache.size_ttl_days),
            size_cache: MemoryCache::new(config.cache.max_entries),
            result_cache,
            #[cfg(feature = "persist-cache")]
            persistent,
            metrics: MetricsSink::new(),
            registry,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn size_cache_stats(&self) -> crate::cache::CacheStats {
        self.size_cache.stats()
    }

    pub fn clear_caches(&self) {
        self.size_cache.clear();
        if let Some(cache) = &self.result_cache {
            cache.clear();
        }
        #[cfg(feature = "persist-cache")]
        if let Some(db) = &self.persistent {
            if let Err(e) = db.clear() {
                warn!(error = %e, "failed to clear persistent cache");
            }
        }
    }

    // ------------------------------------------------------------------
    // Auxiliary operations
    // ------------------------------------------------------------------

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            backends_loaded: self.registry.loaded_count(),
        }
    }

    pub fn languages(&self, backend_id: Option<&str>) -> Result<Vec<String>> {
        self.registry.languages(backend_id)
    }

    pub fn list_models(&self) -> Vec<BackendInfo> {
        self.registry.list()
    }

    pub async fn load_model(&self, backend_id: &str) -> Result<()> {
        self.registry.get_or_load(backend_id).await.map(|_| ())
    }

    pub async fn unload_model(&self, backend_id: &str) -> Result<()> {
        self.registry.unload(backend_id).await
    }

    /// Detect the language of `text`: a ready backend first, the script
    /// detector as fallback
    pub async fn detect(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(TranslateError::InvalidRequest("empty text".into()));
        }
        if let Some(code) = self.detect_via_backend(text).await {
            return Ok(code);
        }
        let detection = detector::detect(text);
        if detection.language == detector::UNKNOWN {
            return Err(TranslateError::InvalidRequest(
                "could not detect source language".into(),
            ));
        }
        Ok(detection.language.to_string())
    }

    async fn detect_via_backend(&self, text: &str) -> Option<String> {
        // Only consult backends that are already resident; detection is
        // never worth a model load
        let mut candidates = vec![self.config.default_backend.clone()];
        candidates.extend(self.registry.ready_ids());
        for id in candidates {
            if self.registry.status(&id) != Some(BackendStatus::Ready) {
                continue;
            }
            let Ok(lease) = self.registry.get_or_load(&id).await else {
                continue;
            };
            match lease.detect_language(text).await {
                Ok(code) if code != langcode::AUTO => return Some(code),
                Ok(_) => continue,
                Err(e) => {
                    debug!(backend_id = %id, error = %e, "backend detection failed");
                    continue;
                }
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Translation entry points
    // ------------------------------------------------------------------

    /// Translate a request to completion under the overall deadline
    #[tracing::instrument(skip_all, fields(target = %request.target_lang, mode = ?request.mode))]
    pub async fn translate(&self, request: TranslationRequest) -> Result<TranslationResult> {
        let deadline_s = self.config.request.overall_deadline_s;
        let outcome = tokio::time::timeout(
            Duration::from_secs(deadline_s),
            self.translate_inner(&request, None),
        )
        .await
        .unwrap_or(Err(TranslateError::DeadlineExceeded { deadline_s }));

        match &outcome {
            Ok(result) => {
                self.metrics
                    .record_request(result.method, result.chunk_count, result.processing_time_ms);
                info!(
                    method = ?result.method,
                    backend = %result.backend_used,
                    chunks = result.chunk_count,
                    elapsed_ms = result.processing_time_ms,
                    cache_hit = result.cache_hit,
                    "translation done"
                );
            }
            Err(e) => {
                self.metrics.record_failure();
                warn!(error = %e, text = %security::preview(&request.text), "translation failed");
            }
        }
        outcome
    }

    /// Streaming variant: events arrive as chunks complete, terminated
    /// by exactly one `Completed` or `Failed`
    pub fn translate_progressive(self: &Arc<Self>, request: TranslationRequest) -> ProgressiveStream {
        let (tx, stream) = progressive::channel(DEFAULT_EVENT_BUFFER);
        let service = Arc::clone(self);

        tokio::spawn(async move {
            let deadline_s = service.config.request.overall_deadline_s;
            let outcome = tokio::time::timeout(
                Duration::from_secs(deadline_s),
                service.translate_inner(&request, Some(tx.clone())),
            )
            .await
            .unwrap_or(Err(TranslateError::DeadlineExceeded { deadline_s }));

            match outcome {
                Ok(result) => {
                    service.metrics.record_request(
                        result.method,
                        result.chunk_count,
                        result.processing_time_ms,
                    );
                    let _ = tx.send(ProgressEvent::Completed { result }).await;
                }
                Err(e) => {
                    service.metrics.record_failure();
                    let _ = tx
                        .send(ProgressEvent::Failed {
                            error: (&e).into(),
                        })
                        .await;
                }
            }
        });

        stream
    }

    async fn translate_inner(
        &self,
        request: &TranslationRequest,
        events: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<TranslationResult> {
        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.config.request.overall_deadline_s);

        // 1. Validate and resolve languages
        self.validate(request)?;
        let target = langcode::normalize(&request.target_lang)?;
        let source = self.resolve_source(request).await?;

        // 2. Select a backend
        let backend_id = self.registry.select(request, &source, &target)?;

        // 3. Result cache short-circuit
        if let Some(cached) = self.result_cache_get(&backend_id, &source, &target, request) {
            let mut result = cached;
            result.method = Method::Cached;
            result.cache_hit = true;
            // Quality metrics describe a live scoring pass, not a replay
            result.quality_score = None;
            result.quality_grade = None;
            result.processing_time_ms = elapsed_ms(started);
            return Ok(result);
        }

        // 4. Ensure the backend is resident and run the chosen strategy
        let lease = self.registry.get_or_load(&backend_id).await?;
        let backend = Arc::clone(lease.backend());

        // Short texts always go direct; force_optimization only bypasses
        // the semantic shortcut, never the single-call path
        let text_len = request.text.chars().count();
        let direct = request.mode == TranslationMode::Direct
            || text_len <= self.config.request.direct_threshold_chars;
        let shortcut_semantic = !request.force_optimization
            && (request.mode == TranslationMode::Semantic
                || request.user_preference == UserPreference::Fast);

        let strategy = if direct {
            self.run_direct(request, &backend, &source, &target, deadline, events.as_ref())
                .await
        } else if shortcut_semantic {
            match self
                .run_semantic(request, &backend, &source, &target, deadline, events.as_ref())
                .await
            {
                // Fast callers and semantic quality above the bar stop
                // here; balanced callers escalate to the optimizer. A
                // progressive stream has already announced its plan, so
                // it never escalates into a second one.
                Ok((result, quality)) => {
                    if request.user_preference != UserPreference::Fast
                        && quality.composite < request.quality_threshold
                        && events.is_none()
                    {
                        self.run_optimized(
                            request,
                            &backend,
                            &source,
                            &target,
                            deadline,
                            events.as_ref(),
                        )
                        .await
                    } else {
                        Ok(result)
                    }
                }
                Err(e) => Err(e),
            }
        } else {
            self.run_optimized(request, &backend, &source, &target, deadline, events.as_ref())
                .await
        };

        let mut result = match strategy {
            Ok(result) => result,
            Err(e) => {
                self.note_fatal_backend_error(&backend_id, &e);
                return Err(e);
            }
        };

        result.detected_source_lang = source;
        result.backend_used = backend_id.clone();
        result.processing_time_ms = elapsed_ms(started);

        self.result_cache_put(&backend_id, &target, &result, request);
        Ok(result)
    }

    /// Known-fatal runtime error signatures: the backend is parked
    /// behind backoff instead of being hammered with doomed requests
    fn note_fatal_backend_error(&self, backend_id: &str, err: &TranslateError) {
        const FATAL_PATTERNS: &[&str] = &["cuda", "out of memory", "device", "panicked"];
        if let TranslateError::BackendInternal { message, .. } = err {
            let lowered = message.to_lowercase();
            if FATAL_PATTERNS.iter().any(|p| lowered.contains(p)) {
                self.registry.mark_failed(backend_id, message);
            }
        }
    }

    fn validate(&self, request: &TranslationRequest) -> Result<()> {
        if request.text.trim().is_empty() {
            return Err(TranslateError::InvalidRequest("text must not be empty".into()));
        }
        let len = request.text.chars().count();
        let cap = self.config.request.hard_text_cap;
        if len > cap {
            return Err(TranslateError::InvalidRequest(format!(
                "text length {len} exceeds the cap of {cap} characters"
            )));
        }
        if request.target_lang.eq_ignore_ascii_case(langcode::AUTO) {
            return Err(TranslateError::InvalidRequest(
                "target_lang must be a concrete language".into(),
            ));
        }
        if !(0.0..=1.0).contains(&request.quality_threshold) {
            return Err(TranslateError::InvalidRequest(
                "quality_threshold must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    async fn resolve_source(&self, request: &TranslationRequest) -> Result<String> {
        let normalized = langcode::normalize(&request.source_lang)?;
        if normalized != langcode::AUTO {
            return Ok(normalized);
        }
        self.detect(&request.text).await
    }

    // ------------------------------------------------------------------
    // Strategies
    // ------------------------------------------------------------------

    async fn run_direct(
        &self,
        request: &TranslationRequest,
        backend: &Arc<dyn ModelBackend>,
        source: &str,
        target: &str,
        deadline: Instant,
        events: Option<&mpsc::Sender<ProgressEvent>>,
    ) -> Result<TranslationResult> {
        let chunks = vec![Chunk {
            index: 0,
            text: request.text.trim().to_string(),
            char_range: (0, request.text.chars().count()),
        }];
        let results = self
            .run_chunks(backend, &chunks, source, target, deadline, events)
            .await?;
        let translated_text = chunker::join_chunks(&results.texts);

        // Direct responses skip the quality fields, but balanced and
        // quality callers still get a scoring pass in the logs
        if request.user_preference != UserPreference::Fast {
            let metrics = scorer::score(&request.text, &translated_text, None, results.confidences[0]);
            debug!(composite = metrics.composite, "direct translation scored");
        }

        Ok(partial_result(translated_text, Method::Direct, 1, None, None, false, false))
    }

    async fn run_semantic(
        &self,
        request: &TranslationRequest,
        backend: &Arc<dyn ModelBackend>,
        source: &str,
        target: &str,
        deadline: Instant,
        events: Option<&mpsc::Sender<ProgressEvent>>,
    ) -> Result<(TranslationResult, QualityMetrics)> {
        let cap = self.config.chunker.default_max_chunk_size;
        let chunks = chunker::chunk(&request.text, cap);
        let results = self
            .run_chunks(backend, &chunks, source, target, deadline, events)
            .await?;
        self.metrics.record_degraded_chunks(results.failed_indices.len());

        let translated_text = chunker::join_chunks(&results.texts);
        let metrics = scorer::score(
            &request.text,
            &translated_text,
            Some(&results.texts),
            mean(&results.confidences),
        );

        let result = partial_result(
            translated_text,
            Method::Semantic,
            chunks.len().max(1),
            Some(cap),
            Some(metrics),
            false,
            false,
        );
        Ok((result, metrics))
    }

    async fn run_optimized(
        &self,
        request: &TranslationRequest,
        backend: &Arc<dyn ModelBackend>,
        source: &str,
        target: &str,
        deadline: Instant,
        events: Option<&mpsc::Sender<ProgressEvent>>,
    ) -> Result<TranslationResult> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let budget = Duration::from_secs(request.max_optimization_time_s).min(remaining);

        let outcome = self
            .optimizer
            .optimize(
                &request.text,
                source,
                target,
                backend,
                &self.translator,
                &self.size_cache,
                request.quality_threshold,
                budget,
            )
            .await?;
        self.metrics.record_optimizer_probes(outcome.probes);

        let chunks = chunker::chunk(&request.text, outcome.chunk_size);
        let results = self
            .run_chunks(backend, &chunks, source, target, deadline, events)
            .await?;
        self.metrics.record_degraded_chunks(results.failed_indices.len());

        let translated_text = chunker::join_chunks(&results.texts);
        let metrics = scorer::score(
            &request.text,
            &translated_text,
            Some(&results.texts),
            mean(&results.confidences),
        );

        Ok(partial_result(
            translated_text,
            Method::Optimized,
            chunks.len().max(1),
            Some(outcome.chunk_size),
            Some(metrics),
            true,
            outcome.cache_hit,
        ))
    }

    /// Shared fan-out wrapper: announces the plan and forwards per-chunk
    /// completions into the progressive stream when one is attached
    async fn run_chunks(
        &self,
        backend: &Arc<dyn ModelBackend>,
        chunks: &[Chunk],
        source: &str,
        target: &str,
        deadline: Instant,
        events: Option<&mpsc::Sender<ProgressEvent>>,
    ) -> Result<ChunkResults> {
        let mut job = ChunkJob::new(source, target);
        job.deadline = Some(deadline);
        job.deadline_s = self.config.request.overall_deadline_s;

        let forwarder = if let Some(events) = events {
            let _ = events
                .send(ProgressEvent::PlanReady {
                    chunk_count: chunks.len(),
                })
                .await;

            // Tiny adapter channel: when the consumer stalls and the
            // event queue fills, this fills too and chunk tasks block
            // on send, which is the intended admission backpressure
            let (ctx, mut crx) = mpsc::channel::<(usize, String)>(1);
            job.progress = Some(ctx);
            let events = events.clone();
            Some(tokio::spawn(async move {
                // Keep draining after the consumer goes away so chunk
                // tasks never block on a send nobody will receive
                let mut consumer_gone = false;
                while let Some((index, text)) = crx.recv().await {
                    if consumer_gone {
                        continue;
                    }
                    if events
                        .send(ProgressEvent::ChunkReady { index, text })
                        .await
                        .is_err()
                    {
                        consumer_gone = true;
                    }
                }
            }))
        } else {
            None
        };

        let results = self.translator.translate_chunks(backend, chunks, job).await;

        if let Some(handle) = forwarder {
            let _ = handle.await;
        }
        results
    }

    // ------------------------------------------------------------------
    // Result cache plumbing
    // ------------------------------------------------------------------

    fn result_cache_get(
        &self,
        backend_id: &str,
        source: &str,
        target: &str,
        request: &TranslationRequest,
    ) -> Option<TranslationResult> {
        let key = result_key(
            backend_id,
            source,
            target,
            &request.text,
            request.api_token.as_deref(),
        );

        if let Some(cache) = &self.result_cache {
            if let Some(bytes) = cache.get(&key) {
                if let Ok(result) = serde_json::from_slice(&bytes) {
                    return Some(result);
                }
            }
        }
        #[cfg(feature = "persist-cache")]
        if let Some(db) = &self.persistent {
            if let Some(bytes) = db.get(&key) {
                if let Ok(result) = serde_json::from_slice(&bytes) {
                    return Some(result);
                }
            }
        }
        None
    }

    fn result_cache_put(
        &self,
        backend_id: &str,
        target: &str,
        result: &TranslationResult,
        request: &TranslationRequest,
    ) {
        let Some(ttl_s) = self.config.cache.result_ttl_s else {
            return;
        };
        let ttl = Duration::from_secs(ttl_s);
        let key = result_key(
            backend_id,
            &result.detected_source_lang,
            target,
            &request.text,
            request.api_token.as_deref(),
        );

        // Timings are per-request; strip them before storing
        let mut stored = result.clone();
        stored.processing_time_ms = 0;

        match serde_json::to_vec(&stored) {
            Ok(bytes) => {
                if let Some(cache) = &self.result_cache {
                    cache.put(&key, bytes.clone(), ttl);
                }
                #[cfg(feature = "persist-cache")]
                if let Some(db) = &self.persistent {
                    db.put(&key, bytes, ttl);
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize result for cache"),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    (started.elapsed().as_millis() as u64).max(1)
}

fn mean(confidences: &[Option<f64>]) -> Option<f64> {
    let known: Vec<f64> = confidences.iter().flatten().copied().collect();
    if known.is_empty() {
        None
    } else {
        Some(known.iter().sum::<f64>() / known.len() as f64)
    }
}

fn partial_result(
    translated_text: String,
    method: Method,
    chunk_count: usize,
    chunk_size: Option<usize>,
    metrics: Option<QualityMetrics>,
    optimization_applied: bool,
    cache_hit: bool,
) -> TranslationResult {
    TranslationResult {
        translated_text: translated_text.trim().to_string(),
        detected_source_lang: String::new(),
        backend_used: String::new(),
        method,
        chunk_count,
        chunk_size,
        quality_score: metrics.map(|m| m.composite),
        quality_grade: metrics.map(|m| QualityGrade::from_score(m.composite)),
        optimization_applied,
        cache_hit,
        processing_time_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockBackend;
    use crate::backend::BackendFamily;

    fn service_with(backends: Vec<Arc<dyn ModelBackend>>, config: Config) -> Arc<TranslatorService> {
        let registry = ModelRegistry::with_backends(&config, backends);
        Arc::new(TranslatorService::with_registry(config, registry))
    }

    fn echo_pair() -> Vec<Arc<dyn ModelBackend>> {
        vec![
            Arc::new(MockBackend::new("specialized", BackendFamily::Specialized)),
            Arc::new(MockBackend::new("generative", BackendFamily::Generative)),
        ]
    }

    fn paragraphs(n: usize, sentence: &str) -> String {
        // ~300 chars per paragraph of plain narrative
        let per = 300 / sentence.len().max(1) + 1;
        (0..n)
            .map(|_| sentence.repeat(per))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn short_direct_scenario() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);

        let mut request = TranslationRequest::simple("Hello, world!", "auto", "ru");
        request.mode = TranslationMode::Direct;
        let result = service.translate(request).await.unwrap();

        assert_eq!(result.detected_source_lang, "en");
        assert_eq!(result.method, Method::Direct);
        assert_eq!(result.chunk_count, 1);
        assert!(!result.translated_text.is_empty());
        assert!(result.quality_score.is_none());
        assert!(result.processing_time_ms > 0);
    }

    #[tokio::test]
    async fn semantic_chunking_scenario() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);

        let text = paragraphs(3, "Это предложение на русском языке для проверки. ");
        assert!(text.chars().count() > 600);

        let mut request = TranslationRequest::simple(&text, "ru", "en");
        request.mode = TranslationMode::Semantic;
        request.user_preference = UserPreference::Fast;
        let result = service.translate(request).await.unwrap();

        assert_eq!(result.method, Method::Semantic);
        assert!(result.chunk_count >= 2);
        assert!(result.quality_score.is_some());
        assert!(result.quality_grade.is_some());
        // Echo backend: assembled output reproduces the source in order
        assert_eq!(
            chunker::normalize_whitespace(&result.translated_text),
            chunker::normalize_whitespace(&text)
        );
    }

    #[tokio::test]
    async fn adaptive_optimizer_scenario() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);

        let text = "The narrator kept walking through the old town at dusk. \
                    Lamps flickered on one by one along the riverside. "
            .repeat(25);
        assert!(text.chars().count() > 2000);

        let mut request = TranslationRequest::simple(&text, "en", "de");
        request.mode = TranslationMode::Adaptive;
        request.quality_threshold = 0.85;
        request.max_optimization_time_s = 5;
        let result = service.translate(request).await.unwrap();

        assert_eq!(result.method, Method::Optimized);
        assert!(result.optimization_applied);
        let size = result.chunk_size.unwrap();
        assert!((50..=2000).contains(&size));
        assert!(result.quality_score.is_some());
    }

    #[tokio::test]
    async fn optimizer_replay_hits_size_cache() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);

        let text = "Short sentences in a longer document. It continues for a while. "
            .repeat(40);
        let mut request = TranslationRequest::simple(&text, "en", "de");
        request.mode = TranslationMode::Adaptive;

        let first = service.translate(request.clone()).await.unwrap();
        assert!(!first.cache_hit);

        let second = service.translate(request).await.unwrap();
        assert_eq!(second.method, Method::Optimized);
        assert!(second.cache_hit, "replay should hit the size cache");
        assert_eq!(second.chunk_size, first.chunk_size);
    }

    #[tokio::test]
    async fn unsupported_pair_falls_over_to_generative() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);

        let request = TranslationRequest::simple("Good morning to everyone", "en", "yo");
        let result = service.translate(request).await.unwrap();

        assert_eq!(result.backend_used, "generative");
        assert!(!result.translated_text.is_empty());
    }

    #[tokio::test]
    async fn transient_chunk_failures_recover_without_markers() {
        let config = Config::default();
        let backends: Vec<Arc<dyn ModelBackend>> = vec![
            Arc::new(
                MockBackend::new("specialized", BackendFamily::Specialized)
                    .with_transient_failures(&[2, 5]),
            ),
            Arc::new(MockBackend::new("generative", BackendFamily::Generative)),
        ];
        let service = service_with(backends, config);

        let text = "A steady sentence for the pipeline to carry. ".repeat(30);
        let mut request = TranslationRequest::simple(&text, "en", "fr");
        request.mode = TranslationMode::Semantic;
        request.user_preference = UserPreference::Fast;

        let result = service.translate(request).await.unwrap();
        assert!(!result.translated_text.contains("«translation-error:"));
    }

    #[tokio::test]
    async fn empty_text_is_invalid() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);
        let err = service
            .translate(TranslationRequest::simple("   ", "en", "ru"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn oversized_text_is_invalid() {
        let config = Config::default();
        let cap = config.request.hard_text_cap;
        let service = service_with(echo_pair(), config);
        let err = service
            .translate(TranslationRequest::simple(&"x".repeat(cap + 1), "en", "ru"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn auto_target_is_invalid() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);
        let err = service
            .translate(TranslationRequest::simple("Hello", "en", "auto"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn unknown_target_is_unsupported() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);
        let err = service
            .translate(TranslationRequest::simple("Hello", "en", "tlh"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::UnsupportedLanguage { .. }));
    }

    #[tokio::test]
    async fn result_cache_replays_as_cached() {
        let mut config = Config::default();
        config.cache.result_ttl_s = Some(600);
        let service = service_with(echo_pair(), config);

        let mut request = TranslationRequest::simple("Hello there, old friend!", "en", "ru");
        request.mode = TranslationMode::Direct;

        let first = service.translate(request.clone()).await.unwrap();
        assert!(!first.cache_hit);

        let second = service.translate(request).await.unwrap();
        assert_eq!(second.method, Method::Cached);
        assert!(second.cache_hit);
        assert!(second.quality_score.is_none());
        assert_eq!(second.translated_text, first.translated_text);
    }

    #[tokio::test]
    async fn result_cache_partitions_by_identity_token() {
        let mut config = Config::default();
        config.cache.result_ttl_s = Some(600);
        let service = service_with(echo_pair(), config);

        let mut request = TranslationRequest::simple("Partitioned caching test", "en", "ru");
        request.mode = TranslationMode::Direct;
        request.api_token = Some("caller-one".into());
        service.translate(request.clone()).await.unwrap();

        request.api_token = Some("caller-two".into());
        let other = service.translate(request).await.unwrap();
        assert!(!other.cache_hit, "different identity must not share entries");
    }

    #[tokio::test]
    async fn progressive_events_agree_with_final_result() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);

        let text = "One idea per sentence works well. Another idea follows the first. \
                    The third closes the paragraph. "
            .repeat(12);
        let mut request = TranslationRequest::simple(&text, "en", "fr");
        request.mode = TranslationMode::Progressive;
        request.user_preference = UserPreference::Fast;

        let events = service.translate_progressive(request).collect().await;

        let mut plan_count = None;
        let mut slots: Vec<Option<String>> = Vec::new();
        let mut completed = None;
        for event in &events {
            match event {
                ProgressEvent::PlanReady { chunk_count } => {
                    plan_count = Some(*chunk_count);
                    slots = vec![None; *chunk_count];
                }
                ProgressEvent::ChunkReady { index, text } => {
                    slots[*index] = Some(text.clone());
                }
                ProgressEvent::Completed { result } => completed = Some(result.clone()),
                ProgressEvent::Failed { error } => panic!("unexpected failure: {error:?}"),
            }
        }

        let plan_count = plan_count.expect("plan event present");
        let result = completed.expect("completed event present");
        assert!(plan_count >= 2);
        assert_eq!(result.chunk_count, plan_count);

        // T10: placing every ChunkReady at its index reproduces the
        // final text modulo single-space joins
        let assembled: Vec<String> = slots.into_iter().map(|s| s.unwrap()).collect();
        assert_eq!(
            chunker::normalize_whitespace(&chunker::join_chunks(&assembled)),
            chunker::normalize_whitespace(&result.translated_text)
        );
    }

    #[tokio::test]
    async fn progressive_failure_emits_failed_event() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);

        let request = TranslationRequest::simple("  ", "en", "ru");
        let events = service.translate_progressive(request).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProgressEvent::Failed { .. }));
    }

    #[tokio::test]
    async fn detect_falls_back_to_script_detector() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);
        // No backend loaded yet: the script detector answers
        assert_eq!(service.detect("Привет, мир, как дела!").await.unwrap(), "ru");
    }

    #[tokio::test]
    async fn health_reports_loaded_backends() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);
        assert_eq!(service.health().backends_loaded, 0);

        service.load_model("specialized").await.unwrap();
        let report = service.health();
        assert_eq!(report.status, "ok");
        assert_eq!(report.backends_loaded, 1);
    }

    #[tokio::test]
    async fn short_text_stays_direct_despite_force_optimization() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);

        let mut request = TranslationRequest::simple("A short note to translate.", "en", "ru");
        request.force_optimization = true;

        let result = service.translate(request).await.unwrap();
        assert_eq!(result.method, Method::Direct);
        assert_eq!(result.chunk_count, 1);
        assert!(!result.optimization_applied);
        assert!(result.chunk_size.is_none());
    }

    #[tokio::test]
    async fn force_optimization_overrides_fast_path() {
        let config = Config::default();
        let service = service_with(echo_pair(), config);

        let text = "Sentences stack up into a real document here. ".repeat(30);
        let mut request = TranslationRequest::simple(&text, "en", "es");
        request.user_preference = UserPreference::Fast;
        request.force_optimization = true;

        let result = service.translate(request).await.unwrap();
        assert_eq!(result.method, Method::Optimized);
        assert!(result.optimization_applied);
    }
}
