//! Grounded answer synthesis with ordered backend fallback.
//!
//! Backends are tried in priority order; the first non-empty answer wins.
//! Each attempt is bounded by `backend_timeout_secs`, and a timeout counts
//! as a failure of that backend. `references` are exactly the chunk texts
//! placed in the prompt, in prompt order.
use std::sync::Arc;
use std::time::Duration;

use pdfqa_core::config::SynthesisConfig;
use pdfqa_core::error::{BackendFailure, GenerationError, SynthesisError};
use pdfqa_core::traits::Generator;
use pdfqa_core::types::{AnswerResult, RetrievalCandidate};

pub struct AnswerSynthesizer {
    backends: Vec<Arc<dyn Generator>>,
    config: SynthesisConfig,
}

impl AnswerSynthesizer {
    pub fn new(backends: Vec<Arc<dyn Generator>>, config: SynthesisConfig) -> Self { Self { backends, config } }

    pub fn backend_names(&self) -> Vec<String> { self.backends.iter().map(|b| b.name().to_string()).collect() }

    /// The answer returned, without calling any backend, when nothing matched.
    pub fn insufficient_context(&self) -> AnswerResult {
        AnswerResult { answer: self.config.insufficient_context_answer.clone(), references: Vec::new(), backend: None }
    }

    pub fn build_prompt(&self, question: &str, references: &[String]) -> String {
        render(&self.config.prompt_template, question, &references.join("\n"))
    }

    pub async fn synthesize(&self, question: &str, candidates: &[RetrievalCandidate], k: usize) -> Result<AnswerResult, SynthesisError> {
        if candidates.is_empty() || k == 0 { return Ok(self.insufficient_context()); }
        if self.backends.is_empty() { return Err(SynthesisError::NoBackends); }
        let references: Vec<String> = candidates.iter().take(k).map(|c| c.chunk.text.clone()).collect();
        let prompt = self.build_prompt(question, &references);
        let timeout = Duration::from_secs(self.config.backend_timeout_secs);

        let mut attempts = Vec::new();
        for backend in &self.backends {
            let outcome = match tokio::time::timeout(timeout, backend.generate(&prompt)).await {
                Ok(Ok(text)) if text.trim().is_empty() => Err(GenerationError::Empty),
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout(timeout)),
            };
            match outcome {
                Ok(answer) => {
                    if !attempts.is_empty() { tracing::info!(backend = backend.name(), failed = attempts.len(), "answered by fallback backend"); }
                    return Ok(AnswerResult { answer: answer.trim().to_string(), references, backend: Some(backend.name().to_string()) });
                }
                Err(error) => {
                    tracing::warn!(backend = backend.name(), %error, "generation backend failed");
                    attempts.push(BackendFailure { backend: backend.name().to_string(), error });
                }
            }
        }
        Err(SynthesisError::AllBackendsFailed { attempts })
    }
}

/// Substitutes `{question}` and `{context}` in one pass, so placeholder-like
/// text inside either value is left alone.
fn render(template: &str, question: &str, context: &str) -> String {
    let mut out = String::with_capacity(template.len() + question.len() + context.len());
    let mut rest = template;
    loop {
        let next = [("{question}", question), ("{context}", context)]
            .into_iter()
            .filter_map(|(p, v)| rest.find(p).map(|i| (i, p, v)))
            .min_by_key(|(i, _, _)| *i);
        match next {
            Some((i, placeholder, value)) => {
                out.push_str(&rest[..i]);
                out.push_str(value);
                rest = &rest[i + placeholder.len()..];
            }
            None => { out.push_str(rest); return out; }
        }
    }
}
