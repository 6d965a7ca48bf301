//! Bounded-concurrency chunk fan-out.
//!
//! Chunks are admitted under a process-wide semaphore and translated
//! concurrently; results are reassembled strictly by chunk index, never
//! by completion time. `buffered` (not `buffer_unordered`) keeps the
//! collected order aligned with the input order.
//!
//! Per-chunk failures degrade rather than abort: transient errors are
//! retried with jittered exponential backoff, permanent ones leave an
//! inline marker. Only a majority of failed chunks fails the call.

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::backend::ModelBackend;
use crate::chunker::Chunk;
use crate::error::{Result, TranslateError};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_ATTEMPTS: u32 = 3;

/// Marker embedded in place of a chunk that could not be translated
pub fn degradation_marker(err: &TranslateError) -> String {
    format!("«translation-error:{}»", err.kind().as_str())
}

/// Per-call knobs; the translator itself is shared and stateless
pub struct ChunkJob<'a> {
    pub source: &'a str,
    pub target: &'a str,
    /// Absolute cutoff for admissions and retries
    pub deadline: Option<Instant>,
    /// Cooperative cancel flag checked before every admission
    pub cancel: Option<Arc<AtomicBool>>,
    /// Completion-order progress feed; a full channel exerts
    /// backpressure by holding the admission slot
    pub progress: Option<mpsc::Sender<(usize, String)>>,
    /// Seconds reported when the deadline aborts the call
    pub deadline_s: u64,
}

impl<'a> ChunkJob<'a> {
    pub fn new(source: &'a str, target: &'a str) -> Self {
        Self {
            source,
            target,
            deadline: None,
            cancel: None,
            progress: None,
            deadline_s: 0,
        }
    }
}

#[derive(Debug)]
pub struct ChunkResults {
    /// Translation per chunk, indexed like the input; failed chunks
    /// carry the degradation marker
    pub texts: Vec<String>,
    pub confidences: Vec<Option<f64>>,
    pub failed_indices: Vec<usize>,
}

impl ChunkResults {
    pub fn is_degraded(&self) -> bool {
        !self.failed_indices.is_empty()
    }
}

pub struct ChunkTranslator {
    semaphore: Arc<Semaphore>,
    max_inflight: usize,
}

impl ChunkTranslator {
    pub fn new(max_inflight: usize) -> Self {
        let max_inflight = max_inflight.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_inflight)),
            max_inflight,
        }
    }

    /// Translate every chunk, preserving order in the output.
    ///
    /// Fails only on cancellation, deadline, or a majority of permanent
    /// chunk failures; anything less returns a degraded result.
    pub async fn translate_chunks(
        &self,
        backend: &Arc<dyn ModelBackend>,
        chunks: &[Chunk],
        job: ChunkJob<'_>,
    ) -> Result<ChunkResults> {
        if chunks.is_empty() {
            return Ok(ChunkResults {
                texts: Vec::new(),
                confidences: Vec::new(),
                failed_indices: Vec::new(),
            });
        }

        let cancel = job.cancel.clone();
        let progress = job.progress.clone();
        let source = job.source;
        let target = job.target;
        let deadline = job.deadline;

        let outcomes: Vec<Result<(String, Option<f64>)>> = stream::iter(chunks.to_vec())
            .map(|chunk| {
                let backend = Arc::clone(backend);
                let semaphore = Arc::clone(&self.semaphore);
                let cancel = cancel.clone();
                let progress = progress.clone();
                async move {
                    let result = translate_one(
                        &backend,
                        &chunk.text,
                        source,
                        target,
                        &semaphore,
                        deadline,
                        cancel.as_deref(),
                    )
                    .await;

                    if let (Ok((text, _)), Some(tx)) = (&result, &progress) {
                        // A slow consumer blocks here, which is the
                        // intended backpressure on further admissions
                        let _ = tx.send((chunk.index, text.clone())).await;
                    }
                    result
                }
            })
            .buffered(self.max_inflight) // buffered preserves order, buffer_unordered does not!
            .collect()
            .await;

        // The caller cancelled or ran out of time: in-flight work has
        // settled above, late results are discarded with the error.
        // A merely-elapsed deadline is not the cause unless some chunk
        // actually failed on it; unrelated chunk failures keep the
        // degraded-result path below.
        let cancelled = cancel
            .as_ref()
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(false);
        let timed_out = job
            .deadline
            .map(|d| Instant::now() >= d)
            .unwrap_or(false);
        let deadline_hit = timed_out
            && outcomes
                .iter()
                .any(|o| matches!(o, Err(TranslateError::DeadlineExceeded { .. })));
        if cancelled || deadline_hit {
            return Err(TranslateError::DeadlineExceeded {
                deadline_s: job.deadline_s,
            });
        }

        let total = outcomes.len();
        let mut texts = Vec::with_capacity(total);
        let mut confidences = Vec::with_capacity(total);
        let mut failed_indices = Vec::new();

        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok((text, confidence)) => {
                    texts.push(text);
                    confidences.push(confidence);
                }
                Err(e) => {
                    warn!(chunk = index, error = %e, "chunk failed permanently, embedding marker");
                    texts.push(degradation_marker(&e));
                    confidences.push(None);
                    failed_indices.push(index);
                }
            }
        }

        if failed_indices.len() * 2 > total {
            return Err(TranslateError::ChunkTranslationFailed {
                failed: failed_indices.len(),
                total,
            });
        }

        Ok(ChunkResults {
            texts,
            confidences,
            failed_indices,
        })
    }
}

/// One chunk: admission, attempt, classify, maybe retry.
///
/// The permit is held only for the inference call itself; backoff
/// sleeps happen with the slot released.
async fn translate_one(
    backend: &Arc<dyn ModelBackend>,
    text: &str,
    source: &str,
    target: &str,
    semaphore: &Semaphore,
    deadline: Option<Instant>,
    cancel: Option<&AtomicBool>,
) -> Result<(String, Option<f64>)> {
    let mut last_error = None;

    for attempt in 0..MAX_ATTEMPTS {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Acquire) {
                return Err(TranslateError::DeadlineExceeded { deadline_s: 0 });
            }
        }
        if let Some(d) = deadline {
            if Instant::now() >= d {
                return Err(TranslateError::DeadlineExceeded { deadline_s: 0 });
            }
        }

        let outcome = {
            let _permit = semaphore
                .acquire()
                .await
                .expect("admission semaphore never closed");
            backend.translate(text, source, target).await
        };

        match outcome {
            Ok(output) => return Ok((output.text, output.confidence)),
            Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                // base * 2^attempt, jittered by +-25%
                let base = RETRY_BASE_DELAY.as_millis() as u64 * (1u64 << attempt);
                let jittered = (base as f64 * (0.75 + fastrand::f64() * 0.5)) as u64;
                let delay = Duration::from_millis(jittered);

                if let Some(d) = deadline {
                    if Instant::now() + delay >= d {
                        return Err(e);
                    }
                }
                debug!(attempt, delay_ms = jittered, "transient chunk failure, retrying");
                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| TranslateError::InvalidRequest("no attempts made".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockBackend;
    use crate::backend::BackendFamily;
    use crate::chunker;

    fn chunks_of(texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                index,
                text: text.to_string(),
                char_range: (0, text.chars().count()),
            })
            .collect()
    }

    fn as_backend(mock: MockBackend) -> Arc<dyn ModelBackend> {
        Arc::new(mock)
    }

    #[tokio::test]
    async fn output_order_matches_index_under_fuzzed_latency() {
        let backend = as_backend(
            MockBackend::new("specialized", BackendFamily::Specialized)
                .with_latency(1, 30)
                .with_transform(|text, _, _| format!("T:{text}"))
                .mark_ready(),
        );
        let inputs: Vec<String> = (0..20).map(|i| format!("chunk-{i}")).collect();
        let input_refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        let chunks = chunks_of(&input_refs);

        let translator = ChunkTranslator::new(5);
        let results = translator
            .translate_chunks(&backend, &chunks, ChunkJob::new("en", "ru"))
            .await
            .unwrap();

        for (i, text) in results.texts.iter().enumerate() {
            assert_eq!(text, &format!("T:chunk-{i}"));
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_without_markers() {
        let backend = as_backend(
            MockBackend::new("specialized", BackendFamily::Specialized)
                .with_transient_failures(&[1, 3])
                .mark_ready(),
        );
        let chunks = chunks_of(&["a", "b", "c"]);

        let translator = ChunkTranslator::new(2);
        let results = translator
            .translate_chunks(&backend, &chunks, ChunkJob::new("en", "ru"))
            .await
            .unwrap();

        assert!(!results.is_degraded());
        assert_eq!(results.texts, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn permanent_failures_embed_markers_in_place() {
        // Ordinal 2 of 4 sequential calls fails permanently
        let backend = as_backend(
            MockBackend::new("specialized", BackendFamily::Specialized)
                .with_permanent_failures(&[2])
                .mark_ready(),
        );
        let chunks = chunks_of(&["a", "b", "c", "d"]);

        let translator = ChunkTranslator::new(1); // sequential, ordinals deterministic
        let results = translator
            .translate_chunks(&backend, &chunks, ChunkJob::new("en", "ru"))
            .await
            .unwrap();

        assert_eq!(results.failed_indices, vec![1]);
        assert!(results.texts[1].starts_with("«translation-error:"));
        assert_eq!(results.texts[0], "a");
        assert_eq!(results.texts[2], "c");
    }

    #[tokio::test]
    async fn majority_failure_fails_the_call() {
        let backend = as_backend(
            MockBackend::new("specialized", BackendFamily::Specialized)
                .with_permanent_failures(&[1, 2, 3])
                .mark_ready(),
        );
        let chunks = chunks_of(&["a", "b", "c", "d"]);

        let translator = ChunkTranslator::new(1);
        let err = translator
            .translate_chunks(&backend, &chunks, ChunkJob::new("en", "ru"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TranslateError::ChunkTranslationFailed { failed: 3, total: 4 }
        ));
    }

    #[tokio::test]
    async fn admission_respects_concurrency_cap() {
        let mock = Arc::new(
            MockBackend::new("specialized", BackendFamily::Specialized)
                .with_latency(10, 20)
                .mark_ready(),
        );
        let backend: Arc<dyn ModelBackend> = mock.clone();
        let inputs: Vec<String> = (0..12).map(|i| format!("c{i}")).collect();
        let input_refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        let chunks = chunks_of(&input_refs);

        let translator = ChunkTranslator::new(3);
        translator
            .translate_chunks(&backend, &chunks, ChunkJob::new("en", "ru"))
            .await
            .unwrap();

        assert!(
            mock.inflight_peak.load(Ordering::SeqCst) <= 3,
            "peak {} exceeded cap",
            mock.inflight_peak.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn elapsed_deadline_does_not_mask_unrelated_failures() {
        // Every chunk is admitted before the deadline passes; one fails
        // permanently for its own reasons while the rest outlive the
        // deadline. The call must stay a degraded success, not turn
        // into DeadlineExceeded.
        let backend = as_backend(
            MockBackend::new("specialized", BackendFamily::Specialized)
                .with_latency(30, 50)
                .with_permanent_failures(&[2])
                .mark_ready(),
        );
        let chunks = chunks_of(&["a", "b", "c", "d"]);

        let mut job = ChunkJob::new("en", "ru");
        job.deadline = Some(Instant::now() + Duration::from_millis(20));
        job.deadline_s = 1;

        // Concurrency covers every chunk, so all admissions clear the
        // deadline check before it elapses
        let translator = ChunkTranslator::new(4);
        let results = translator
            .translate_chunks(&backend, &chunks, job)
            .await
            .unwrap();

        assert_eq!(results.failed_indices.len(), 1);
        let failed = results.failed_indices[0];
        assert!(results.texts[failed].starts_with("«translation-error:"));
        assert_eq!(
            results.texts.iter().filter(|t| t.starts_with("«")).count(),
            1
        );
    }

    #[tokio::test]
    async fn cancellation_stops_admissions() {
        let backend = as_backend(
            MockBackend::new("specialized", BackendFamily::Specialized)
                .with_latency(20, 30)
                .mark_ready(),
        );
        let inputs: Vec<String> = (0..10).map(|i| format!("c{i}")).collect();
        let input_refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        let chunks = chunks_of(&input_refs);

        let cancel = Arc::new(AtomicBool::new(false));
        let mut job = ChunkJob::new("en", "ru");
        job.cancel = Some(Arc::clone(&cancel));
        job.deadline_s = 1;

        let translator = ChunkTranslator::new(2);
        let flag = Arc::clone(&cancel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(25)).await;
            flag.store(true, Ordering::Release);
        });

        let err = translator
            .translate_chunks(&backend, &chunks, job)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::DeadlineExceeded { .. }));
    }

    #[tokio::test]
    async fn progress_events_carry_indices() {
        let backend = as_backend(
            MockBackend::new("specialized", BackendFamily::Specialized)
                .with_latency(1, 10)
                .with_transform(|text, _, _| text.to_uppercase())
                .mark_ready(),
        );
        let chunks = chunks_of(&["aa", "bb", "cc", "dd"]);

        let (tx, mut rx) = mpsc::channel(16);
        let mut job = ChunkJob::new("en", "ru");
        job.progress = Some(tx);

        let translator = ChunkTranslator::new(4);
        let results = translator
            .translate_chunks(&backend, &chunks, job)
            .await
            .unwrap();

        let mut seen = vec![None; 4];
        while let Ok((index, text)) = rx.try_recv() {
            seen[index] = Some(text);
        }
        for (i, slot) in seen.iter().enumerate() {
            assert_eq!(slot.as_deref(), Some(results.texts[i].as_str()));
        }
    }

    #[tokio::test]
    async fn real_chunker_output_round_trips() {
        let backend = as_backend(
            MockBackend::new("specialized", BackendFamily::Specialized).mark_ready(),
        );
        let text = "One sentence here. Another one follows! A third asks? The last ends.";
        let chunks = chunker::chunk(text, 25);

        let translator = ChunkTranslator::new(5);
        let results = translator
            .translate_chunks(&backend, &chunks, ChunkJob::new("en", "ru"))
            .await
            .unwrap();

        let joined = chunker::join_chunks(&results.texts);
        assert_eq!(
            chunker::normalize_whitespace(&joined),
            chunker::normalize_whitespace(text)
        );
    }
}
