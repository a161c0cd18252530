use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use pdfqa_core::error::GenerationError;
use pdfqa_core::traits::Generator;

use crate::{http_client, non_empty, status_error, transport_error};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

/// Client for Ollama's non-streaming `POST {base_url}/api/generate`.
pub struct OllamaGenerate {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OllamaGenerate {
    pub fn new(name: &str, base_url: &str, model: &str, temperature: f32, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
            timeout,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerate {
    fn name(&self) -> &str { &self.name }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions { temperature: self.temperature },
        };
        let response = self.client.post(&url).json(&body).send().await.map_err(|e| transport_error(e, self.timeout))?;
        if !response.status().is_success() { return Err(status_error(response).await); }
        let parsed: GenerateResponse = response.json().await.map_err(|e| GenerationError::Malformed(e.to_string()))?;
        non_empty(parsed.response)
    }
}
