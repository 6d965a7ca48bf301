//! Specialized encoder-decoder backend.
//!
//! Client for a local seq2seq inference runtime (NLLB-style). The
//! runtime owns tokenization and beam search; this side owns code
//! conversion to the `xxx_Scrp` native scheme and error mapping.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::backend::{
    http_client, BackendFamily, BackendHealth, BackendInfo, BackendOutput, BackendStatus,
    ModelBackend, StatusCell,
};
use crate::config::BackendSpec;
use crate::error::{Result, TranslateError};
use crate::langcode;

const NATIVE_SCHEME: &str = "flores200";
const CONTEXT_LIMIT_TOKENS: u32 = 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translation: String,
    /// Mean log-prob of the selected beam, when the runtime reports it
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    language: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

pub struct SpecializedSeq2Seq {
    id: String,
    base_url: String,
    beam_size: u32,
    memory_mb: u64,
    client: reqwest::Client,
    status: StatusCell,
}

impl SpecializedSeq2Seq {
    pub fn new(spec: &BackendSpec, pool_size: usize) -> Self {
        Self {
            id: spec.id.clone(),
            base_url: spec.artifact_ref.trim_end_matches('/').to_string(),
            beam_size: spec.load_params.beam_size,
            memory_mb: spec.load_params.memory_mb,
            client: http_client(REQUEST_TIMEOUT, pool_size),
            status: StatusCell::default(),
        }
    }

    fn native_pair(&self, source: &str, target: &str) -> Result<(&'static str, &'static str)> {
        let to = |code: &str| {
            langcode::to_backend(code, BackendFamily::Specialized).map_err(|_| {
                TranslateError::LanguagePairUnsupported {
                    backend_id: self.id.clone(),
                    source_lang: source.to_string(),
                    target: target.to_string(),
                }
            })
        };
        Ok((to(source)?, to(target)?))
    }
}

#[async_trait]
impl ModelBackend for SpecializedSeq2Seq {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> BackendFamily {
        BackendFamily::Specialized
    }

    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<BackendOutput> {
        let (native_source, native_target) = self.native_pair(source, target)?;

        let response = self
            .client
            .post(format!("{}/translate", self.base_url))
            .json(&json!({
                "text": text,
                "source": native_source,
                "target": native_target,
                "beam_size": self.beam_size,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranslateError::from_status(&self.id, status));
        }

        let body: TranslateResponse = response.json().await?;
        if body.translation.trim().is_empty() {
            return Err(TranslateError::BackendInternal {
                backend_id: self.id.clone(),
                message: "empty translation".into(),
            });
        }

        Ok(BackendOutput {
            text: body.translation,
            confidence: body.score,
        })
    }

    async fn detect_language(&self, text: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/detect", self.base_url))
            .json(&json!({ "text": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranslateError::from_status(&self.id, status));
        }

        let body: DetectResponse = response.json().await?;
        let public = langcode::from_backend(&body.language, BackendFamily::Specialized)?;
        Ok(public.to_string())
    }

    fn supported_languages(&self) -> Vec<&'static str> {
        langcode::supported(BackendFamily::Specialized)
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            id: self.id.clone(),
            family: BackendFamily::Specialized,
            supported_languages: self
                .supported_languages()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            native_code_scheme: NATIVE_SCHEME.into(),
            context_limit_tokens: CONTEXT_LIMIT_TOKENS,
            memory_class_mb: self.memory_mb,
            status: self.status.get(),
        }
    }

    async fn health(&self) -> BackendHealth {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<HealthResponse>().await {
                    Ok(body) if body.status == "ok" => BackendHealth::Ok,
                    Ok(_) => BackendHealth::Degraded,
                    Err(_) => BackendHealth::Degraded,
                }
            }
            _ => BackendHealth::Failed,
        }
    }

    async fn load(&self) -> Result<()> {
        self.status.set(BackendStatus::Loading);
        let result = self
            .client
            .post(format!("{}/load", self.base_url))
            .json(&json!({ "beam_size": self.beam_size }))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                self.status.set(BackendStatus::Ready);
                Ok(())
            }
            Ok(resp) => {
                self.status.set(BackendStatus::Failed);
                Err(TranslateError::from_status(&self.id, resp.status()))
            }
            Err(e) => {
                self.status.set(BackendStatus::Failed);
                Err(TranslateError::BackendUnavailable {
                    backend_id: self.id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn unload(&self) -> Result<()> {
        self.status.set(BackendStatus::Unloading);
        let result = self
            .client
            .post(format!("{}/unload", self.base_url))
            .send()
            .await;
        self.status.set(BackendStatus::Unloaded);
        // The runtime freeing weights is best-effort; local state is authoritative
        result.map(|_| ()).or(Ok(()))
    }
}
