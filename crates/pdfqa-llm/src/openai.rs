use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use pdfqa_core::error::GenerationError;
use pdfqa_core::traits::Generator;

use crate::{http_client, non_empty, status_error, transport_error};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Client for `POST {base_url}/chat/completions`.
pub struct OpenAiChat {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiChat {
    pub fn new(name: &str, base_url: &str, model: &str, api_key: Option<String>, temperature: f32, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            temperature,
            timeout,
        })
    }
}

#[async_trait]
impl Generator for OpenAiChat {
    fn name(&self) -> &str { &self.name }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: self.temperature,
        };
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key { req = req.bearer_auth(key); }
        let response = req.send().await.map_err(|e| transport_error(e, self.timeout))?;
        if !response.status().is_success() { return Err(status_error(response).await); }
        let parsed: ChatResponse = response.json().await.map_err(|e| GenerationError::Malformed(e.to_string()))?;
        let content = parsed.choices.into_iter().next().and_then(|c| c.message.content);
        non_empty(content)
    }
}
