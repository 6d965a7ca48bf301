//! Progressive event stream for streaming translation.
//!
//! Events are ordered: one `PlanReady`, then `ChunkReady` per completed
//! chunk in completion order (each carries its index for placement),
//! then exactly one `Completed` or `Failed`. The channel is bounded; a
//! slow consumer backpressures chunk admission instead of buffering
//! without limit.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::request::TranslationResult;

/// Bounded event queue depth before backpressure reaches the translator
pub const DEFAULT_EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    PlanReady {
        chunk_count: usize,
    },
    ChunkReady {
        index: usize,
        text: String,
    },
    Completed {
        result: TranslationResult,
    },
    Failed {
        error: ApiError,
    },
}

impl ProgressEvent {
    /// One line-delimited JSON object, the wire form for SSE-style streams
    pub fn to_ndjson(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"type\":\"failed\"}".into())
    }
}

/// Consumer side of a progressive translation
pub struct ProgressiveStream {
    rx: mpsc::Receiver<ProgressEvent>,
}

impl ProgressiveStream {
    pub fn new(rx: mpsc::Receiver<ProgressEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or None once the terminal event has been consumed
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Drain the stream, returning every event in arrival order
    pub async fn collect(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

pub fn channel(buffer: usize) -> (mpsc::Sender<ProgressEvent>, ProgressiveStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (tx, ProgressiveStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;

    #[test]
    fn events_serialize_with_type_discriminator() {
        let plan = ProgressEvent::PlanReady { chunk_count: 4 };
        assert_eq!(
            plan.to_ndjson(),
            r#"{"type":"plan_ready","chunk_count":4}"#
        );

        let chunk = ProgressEvent::ChunkReady {
            index: 2,
            text: "Привет".into(),
        };
        let json = chunk.to_ndjson();
        assert!(json.contains(r#""type":"chunk_ready""#));
        assert!(json.contains(r#""index":2"#));
    }

    #[test]
    fn completed_event_embeds_result() {
        let result = TranslationResult {
            translated_text: "done".into(),
            detected_source_lang: "en".into(),
            backend_used: "specialized".into(),
            method: Method::Semantic,
            chunk_count: 2,
            chunk_size: Some(300),
            quality_score: Some(0.9),
            quality_grade: None,
            optimization_applied: false,
            cache_hit: false,
            processing_time_ms: 5,
        };
        let event = ProgressEvent::Completed { result };
        let json = event.to_ndjson();
        assert!(json.contains(r#""type":"completed""#));
        assert!(json.contains(r#""translated_text":"done""#));
    }

    #[tokio::test]
    async fn stream_delivers_in_order() {
        let (tx, stream) = channel(8);
        tx.send(ProgressEvent::PlanReady { chunk_count: 2 })
            .await
            .unwrap();
        tx.send(ProgressEvent::ChunkReady {
            index: 1,
            text: "b".into(),
        })
        .await
        .unwrap();
        tx.send(ProgressEvent::ChunkReady {
            index: 0,
            text: "a".into(),
        })
        .await
        .unwrap();
        drop(tx);

        let events = stream.collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ProgressEvent::PlanReady { chunk_count: 2 }));
        // Completion order is preserved even when indices arrive out of order
        assert!(matches!(&events[1], ProgressEvent::ChunkReady { index: 1, .. }));
        assert!(matches!(&events[2], ProgressEvent::ChunkReady { index: 0, .. }));
    }
}
