use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use pdfqa_core::config::RerankConfig;
use pdfqa_core::traits::Reranker;

use crate::http_client;

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankRow>,
}

#[derive(Deserialize)]
struct RerankRow {
    index: usize,
    relevance_score: f32,
}

/// Cross-encoder client for `POST {base_url}/rerank` (bge-reranker and
/// other servers speaking the Jina/Cohere rerank shape).
pub struct CrossEncoderReranker {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    apply_sigmoid: bool,
}

impl CrossEncoderReranker {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, timeout: Duration, apply_sigmoid: bool) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            apply_sigmoid,
        })
    }

    pub fn from_config(config: &RerankConfig) -> anyhow::Result<Self> {
        let api_key = config.api_key_env.as_deref().and_then(|var| std::env::var(var).ok()).filter(|k| !k.is_empty());
        Self::new(&config.base_url, &config.model, api_key, Duration::from_secs(config.request_timeout_secs), config.apply_sigmoid)
    }
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    fn name(&self) -> &str { &self.model }

    async fn score(&self, query: &str, documents: &[String]) -> anyhow::Result<Vec<f32>> {
        if documents.is_empty() { return Ok(Vec::new()); }
        let body = RerankRequest { model: &self.model, query, documents, top_n: documents.len() };
        let mut request = self.client.post(format!("{}/rerank", self.base_url)).json(&body);
        if let Some(key) = &self.api_key { request = request.bearer_auth(key); }
        let response = request.send().await.context("Failed to reach reranker endpoint")?;
        if !response.status().is_success() {
            let status = response.status();
            let text: String = response.text().await.unwrap_or_default().chars().take(500).collect();
            bail!("Reranker returned {}: {}", status, text);
        }
        let parsed: RerankResponse = response.json().await.context("Failed to parse reranker response")?;

        // rows come back sorted by relevance; put them back in input order
        let mut scores: Vec<Option<f32>> = vec![None; documents.len()];
        for row in parsed.results {
            let Some(slot) = scores.get_mut(row.index) else { bail!("reranker returned index {} for {} documents", row.index, documents.len()) };
            *slot = Some(if self.apply_sigmoid { sigmoid(row.relevance_score) } else { row.relevance_score });
        }
        scores
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.with_context(|| format!("reranker returned no score for document {}", i)))
            .collect()
    }
}

pub fn sigmoid(x: f32) -> f32 { 1.0 / (1.0 + (-x).exp()) }

/// `None` unless `rerank.enabled`.
pub fn reranker_from_config(config: &RerankConfig) -> anyhow::Result<Option<std::sync::Arc<dyn Reranker>>> {
    if !config.enabled { return Ok(None); }
    tracing::info!(model = %config.model, base_url = %config.base_url, "reranking hybrid candidates");
    Ok(Some(std::sync::Arc::new(CrossEncoderReranker::from_config(config)?)))
}
