//! Process-wide metrics sink.
//!
//! In-memory only: atomics incremented on the hot path, a serializable
//! snapshot on demand. Nothing here persists across restarts.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::request::Method;

#[derive(Debug, Default)]
pub struct MetricsSink {
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    direct: AtomicU64,
    semantic: AtomicU64,
    optimized: AtomicU64,
    cached: AtomicU64,
    chunks_translated: AtomicU64,
    degraded_chunks: AtomicU64,
    optimizer_probes: AtomicU64,
    total_processing_ms: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub by_method: MethodCounts,
    pub chunks_translated: u64,
    pub degraded_chunks: u64,
    pub optimizer_probes: u64,
    pub avg_processing_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodCounts {
    pub direct: u64,
    pub semantic: u64,
    pub optimized: u64,
    pub cached: u64,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, method: Method, chunk_count: usize, processing_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let counter = match method {
            Method::Direct => &self.direct,
            Method::Semantic => &self.semantic,
            Method::Optimized => &self.optimized,
            Method::Cached => &self.cached,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.chunks_translated
            .fetch_add(chunk_count as u64, Ordering::Relaxed);
        self.total_processing_ms
            .fetch_add(processing_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded_chunks(&self, count: usize) {
        self.degraded_chunks
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_optimizer_probes(&self, probes: u32) {
        self.optimizer_probes
            .fetch_add(probes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.requests_total.load(Ordering::Relaxed);
        let failed = self.requests_failed.load(Ordering::Relaxed);
        let succeeded = total.saturating_sub(failed);
        let total_ms = self.total_processing_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_total: total,
            requests_failed: failed,
            by_method: MethodCounts {
                direct: self.direct.load(Ordering::Relaxed),
                semantic: self.semantic.load(Ordering::Relaxed),
                optimized: self.optimized.load(Ordering::Relaxed),
                cached: self.cached.load(Ordering::Relaxed),
            },
            chunks_translated: self.chunks_translated.load(Ordering::Relaxed),
            degraded_chunks: self.degraded_chunks.load(Ordering::Relaxed),
            optimizer_probes: self.optimizer_probes.load(Ordering::Relaxed),
            avg_processing_ms: if succeeded == 0 {
                0.0
            } else {
                total_ms as f64 / succeeded as f64
            },
        }
    }
}
