//! Generative instructed backend.
//!
//! Client for an Ollama-compatible runtime. The prompt template is
//! stable and owned here; the model sees language names, never codes.
//! Deterministic sampling (temperature 0) keeps repeated probes
//! comparable for the optimizer.

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

const NATIVE_SCHEME: &str = "names";
const CONTEXT_LIMIT_TOKENS: u32 = 8192;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Prefixes chatty models prepend despite instructions
const RESPONSE_PREFIXES: &[&str] = &["Translation:", "Translated text:"];

fn translate_prompt(text: &str, source_name: &str, target_name: &str) -> String {
    format!(
        "You are a professional translator. Translate the following text \
         from {source_name} to {target_name}. Reply with the translation \
         only, no explanations, no quotes.\n\nText:\n{text}"
    )
}

fn detect_prompt(text: &str) -> String {
    format!(
        "Identify the language of the following text. Reply with only the \
         English name of the language.\n\nText:\n{text}"
    )
}

/// Strip scaffolding a chat model may wrap around the answer
fn clean_response(raw: &str) -> String {
    let mut out = raw.trim();
    for prefix in RESPONSE_PREFIXES {
        if let Some(rest) = out.strip_prefix(prefix) {
            out = rest.trim_start();
        }
    }
    if out.len() >= 2 && out.starts_with('"') && out.ends_with('"') {
        out = &out[1..out.len() - 1];
    }
    out.to_string()
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

pub struct GenerativeInstructed {
    id: String,
    base_url: String,
    model: String,
    memory_mb: u64,
    client: reqwest::Client,
    status: StatusCell,
}

impl GenerativeInstructed {
    pub fn new(spec: &BackendSpec, pool_size: usize) -> Self {
        Self {
            id: spec.id.clone(),
            base_url: spec.artifact_ref.trim_end_matches('/').to_string(),
            model: spec
                .load_params
                .model
                .clone()
                .unwrap_or_else(|| "aya:8b".into()),
            memory_mb: spec.load_params.memory_mb,
            client: http_client(REQUEST_TIMEOUT, pool_size),
            status: StatusCell::default(),
        }
    }

    async fn generate(&self, prompt: String) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "options": { "temperature": 0 },
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranslateError::from_status(&self.id, status));
        }

        let body: GenerateResponse = response.json().await?;
        let cleaned = clean_response(&body.response);
        if cleaned.is_empty() {
            return Err(TranslateError::BackendInternal {
                backend_id: self.id.clone(),
                message: "empty generation".into(),
            });
        }
        Ok(cleaned)
    }

    fn language_name(&self, code: &str) -> Result<&'static str> {
        langcode::to_backend(code, BackendFamily::Generative)
    }
}

#[async_trait]
impl ModelBackend for GenerativeInstructed {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> BackendFamily {
        BackendFamily::Generative
    }

    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<BackendOutput> {
        let source_name = self.language_name(source)?;
        let target_name = self.language_name(target)?;

        let text = self
            .generate(translate_prompt(text, source_name, target_name))
            .await?;

        // Generative runtimes expose no usable per-sequence log-prob
        Ok(BackendOutput {
            text,
            confidence: None,
        })
    }

    async fn detect_language(&self, text: &str) -> Result<String> {
        let answer = self.generate(detect_prompt(text)).await?;
        let name = answer
            .split_whitespace()
            .next()
            .unwrap_or(&answer)
            .trim_matches(|c: char| !c.is_alphabetic());
        let public = langcode::from_backend(name, BackendFamily::Generative)?;
        Ok(public.to_string())
    }

    fn supported_languages(&self) -> Vec<&'static str> {
        langcode::supported(BackendFamily::Generative)
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            id: self.id.clone(),
            family: BackendFamily::Generative,
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
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => BackendHealth::Ok,
            Ok(_) => BackendHealth::Degraded,
            Err(_) => BackendHealth::Failed,
        }
    }

    async fn load(&self) -> Result<()> {
        self.status.set(BackendStatus::Loading);

        // Verify the model exists, then page weights in with a warm call
        let tags = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await;

        let available = match tags {
            Ok(resp) if resp.status().is_success() => resp
                .json::<TagsResponse>()
                .await
                .map(|t| t.models.iter().any(|m| m.name == self.model))
                .unwrap_or(false),
            _ => false,
        };
        if !available {
            self.status.set(BackendStatus::Failed);
            return Err(TranslateError::BackendUnavailable {
                backend_id: self.id.clone(),
                reason: format!("model {} not present in runtime", self.model),
            });
        }

        match self.generate("Reply with OK.".into()).await {
            Ok(_) => {
                self.status.set(BackendStatus::Ready);
                Ok(())
            }
            Err(e) => {
                self.status.set(BackendStatus::Failed);
                Err(e)
            }
        }
    }

    async fn unload(&self) -> Result<()> {
        self.status.set(BackendStatus::Unloading);
        // keep_alive: 0 asks the runtime to drop the weights now
        let result = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&json!({ "model": self.model, "keep_alive": 0 }))
            .send()
            .await;
        self.status.set(BackendStatus::Unloaded);
        result.map(|_| ()).or(Ok(()))
    }
}
