//! pdfqa-llm
//!
//! Generation backends behind `pdfqa_core::traits::Generator`: any
//! OpenAI-compatible chat completions endpoint (OpenAI, Groq, ...) and a
//! local Ollama server. Clients never retry; the synthesizer moves on to
//! the next backend instead. Also hosts the optional cross-encoder reranker.
use std::sync::Arc;
use std::time::Duration;

use pdfqa_core::config::{BackendConfig, BackendKind};
use pdfqa_core::error::GenerationError;
pub use pdfqa_core::traits::Generator;

pub mod ollama;
pub mod openai;
pub mod rerank;

pub use ollama::OllamaGenerate;
pub use openai::OpenAiChat;
pub use rerank::{reranker_from_config, CrossEncoderReranker};

pub(crate) fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

pub(crate) fn transport_error(err: reqwest::Error, timeout: Duration) -> GenerationError {
    if err.is_timeout() { GenerationError::Timeout(timeout) } else { GenerationError::Transport(err.to_string()) }
}

/// Maps a non-success status to the matching failure; 429 is a rate limit.
pub(crate) async fn status_error(response: reqwest::Response) -> GenerationError {
    let status = response.status().as_u16();
    if status == 429 { return GenerationError::RateLimited; }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(500).collect();
    GenerationError::Status { status, body }
}

pub(crate) fn non_empty(text: Option<String>) -> Result<String, GenerationError> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t.trim().to_string()),
        _ => Err(GenerationError::Empty),
    }
}

/// Builds the backends in configured priority order.
pub fn backends_from_config(configs: &[BackendConfig]) -> anyhow::Result<Vec<Arc<dyn Generator>>> {
    let mut out: Vec<Arc<dyn Generator>> = Vec::with_capacity(configs.len());
    for c in configs {
        let api_key = c.api_key_env.as_deref().and_then(|var| std::env::var(var).ok()).filter(|k| !k.is_empty());
        if c.api_key_env.is_some() && api_key.is_none() {
            tracing::warn!(backend = %c.name, var = ?c.api_key_env, "API key not set; backend will likely fail");
        }
        let timeout = Duration::from_secs(c.request_timeout_secs);
        let backend: Arc<dyn Generator> = match c.kind {
            BackendKind::Openai => Arc::new(OpenAiChat::new(&c.name, &c.base_url, &c.model, api_key, c.temperature, timeout)?),
            BackendKind::Ollama => Arc::new(OllamaGenerate::new(&c.name, &c.base_url, &c.model, c.temperature, timeout)?),
        };
        out.push(backend);
    }
    Ok(out)
}
