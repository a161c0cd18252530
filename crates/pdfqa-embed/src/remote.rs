//! OpenAI-compatible `/embeddings` client.
//!
//! `Embedder` is synchronous and the pipeline calls it from the blocking
//! pool, so requests are driven with the ambient runtime handle.
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use pdfqa_core::config::EmbeddingConfig;
use pdfqa_core::traits::Embedder;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct RemoteEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dim: usize,
    max_len: usize,
}

impl RemoteEmbedder {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, dim: usize, max_len: usize) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), model: model.to_string(), api_key, dim, max_len })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() { tracing::warn!(var = %config.api_key_env, "no API key for remote embedder"); }
        Self::new(&config.remote_base_url, &config.remote_model, api_key, config.dim, config.max_len)
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let mut req = self.client.post(&url).json(&EmbeddingRequest { model: &self.model, input: texts });
        if let Some(key) = &self.api_key { req = req.bearer_auth(key); }
        let response = req.send().await.with_context(|| format!("POST {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("embedding endpoint returned HTTP {}: {}", status.as_u16(), body);
        }
        let mut parsed: EmbeddingResponse = response.json().await.context("malformed embedding response")?;
        if parsed.data.len() != texts.len() {
            bail!("embedding endpoint returned {} vectors for {} inputs", parsed.data.len(), texts.len());
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

impl Embedder for RemoteEmbedder {
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { self.max_len }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(Vec::new()); }
        let handle = tokio::runtime::Handle::try_current().map_err(|_| anyhow!("RemoteEmbedder needs a tokio runtime"))?;
        handle.block_on(self.request(texts))
    }
}
