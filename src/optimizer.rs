//! Quality-driven chunk size search.
//!
//! Binary search over chunk size, probing each candidate with a real
//! chunk-translate-score pass. The size cache short-circuits the whole
//! search for content shapes seen before; a finished search writes its
//! best size back whether or not it reached the threshold. Running out
//! of budget is not an error: the best known size is always returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::backend::ModelBackend;
use crate::cache::{size_key, MemoryCache, SizeEntry};
use crate::chunker::{self, content_class};
use crate::config::OptimizerConfig;
use crate::error::Result;
use crate::parallel::{ChunkJob, ChunkTranslator};
use crate::scorer;

/// Probes scoring at least this are "acceptable": search larger sizes
/// for fewer joins instead of smaller ones for tighter context
const ACCEPTABLE_QUALITY: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct OptimizeOutcome {
    pub chunk_size: usize,
    pub quality: f64,
    pub cache_hit: bool,
    pub probes: u32,
}

pub struct SizeOptimizer {
    min_size: usize,
    max_size: usize,
    max_iterations: u32,
    size_ttl: Duration,
}

impl SizeOptimizer {
    pub fn new(config: &OptimizerConfig, size_ttl_days: u32) -> Self {
        Self {
            min_size: config.min_size,
            max_size: config.max_size,
            max_iterations: config.max_iterations,
            size_ttl: Duration::from_secs(size_ttl_days as u64 * 24 * 60 * 60),
        }
    }

    /// Find a chunk size in `[min_size, max_size]` maximizing composite
    /// quality for this text, within `time_budget` wall time.
    #[tracing::instrument(skip_all, fields(text_len = text.chars().count()))]
    pub async fn optimize(
        &self,
        text: &str,
        source: &str,
        target: &str,
        backend: &Arc<dyn ModelBackend>,
        translator: &ChunkTranslator,
        size_cache: &MemoryCache,
        quality_threshold: f64,
        time_budget: Duration,
    ) -> Result<OptimizeOutcome> {
        let text_len = text.chars().count();
        let lo_bound = self.min_size;
        let hi_bound = self.max_size.min(text_len.max(lo_bound));

        let class = content_class(text);
        let key = size_key(class.as_str(), source, target, text);

        if let Some(bytes) = size_cache.get(&key) {
            if let Ok(entry) = serde_json::from_slice::<SizeEntry>(&bytes) {
                let cached = entry.optimal_chunk_size.clamp(lo_bound, hi_bound);
                debug!(
                    size = cached,
                    class = class.as_str(),
                    hits = size_cache.use_count(&key),
                    "size cache hit"
                );
                return Ok(OptimizeOutcome {
                    chunk_size: cached,
                    quality: entry.quality_at_size,
                    cache_hit: true,
                    probes: 0,
                });
            }
        }

        let started = Instant::now();
        let deadline = started + time_budget;

        let mut lo = lo_bound;
        let mut hi = hi_bound;
        // Tie-break toward larger sizes: fewer backend calls per request
        let mut best_size = hi_bound;
        let mut best_quality = 0.0_f64;
        let mut probes = 0u32;

        while lo <= hi && probes < self.max_iterations && Instant::now() < deadline {
            let mid = lo + (hi - lo) / 2;
            probes += 1;

            let chunks = chunker::chunk(text, mid);
            let mut job = ChunkJob::new(source, target);
            job.deadline = Some(deadline);

            let results = match translator.translate_chunks(backend, &chunks, job).await {
                Ok(r) => r,
                Err(e) => {
                    // A failed probe ends the search; whatever we know
                    // so far still beats guessing
                    debug!(error = %e, "probe failed, stopping search");
                    break;
                }
            };

            let joined = chunker::join_chunks(&results.texts);
            let confidence = mean_confidence(&results.confidences);
            let metrics = scorer::score(text, &joined, Some(&results.texts), confidence);
            let quality = metrics.composite;

            debug!(probe = probes, size = mid, quality, "optimizer probe");

            if quality > best_quality || (quality == best_quality && mid > best_size) {
                best_size = mid;
                best_quality = quality;
            }

            if quality >= quality_threshold {
                best_size = mid;
                best_quality = quality;
                break;
            } else if quality >= ACCEPTABLE_QUALITY {
                lo = mid + 1;
            } else {
                if mid == 0 {
                    break;
                }
                hi = mid - 1;
            }
        }

        let entry = SizeEntry {
            optimal_chunk_size: best_size,
            quality_at_size: best_quality,
            stored_at: chrono::Utc::now().timestamp(),
            hits: 0,
        };
        if let Ok(bytes) = serde_json::to_vec(&entry) {
            size_cache.put(&key, bytes, self.size_ttl);
        }

        info!(
            size = best_size,
            quality = best_quality,
            probes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "optimizer finished"
        );

        Ok(OptimizeOutcome {
            chunk_size: best_size,
            quality: best_quality,
            cache_hit: false,
            probes,
        })
    }
}

fn mean_confidence(confidences: &[Option<f64>]) -> Option<f64> {
    let known: Vec<f64> = confidences.iter().flatten().copied().collect();
    if known.is_empty() {
        None
    } else {
        Some(known.iter().sum::<f64>() / known.len() as f64)
    }
}
