//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`__` separates nesting, e.g. `APP_RETRIEVAL__RRF_K`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::Error;

pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
You are an assistant for question-answering tasks. Use the following pieces of retrieved context to answer the question.
If you don't know the answer, just say that you don't know. Use three sentences maximum and keep the answer concise.

Question: {question}
Context: {context}
Answer:
";

pub const DEFAULT_INSUFFICIENT_CONTEXT: &str =
    "Sorry, I could not find relevant information in the indexed documents to answer your question.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub target_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self { Self { target_chars: 1000, overlap_chars: 200 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    pub max_k: usize,
    /// Hybrid queries ask each index for `k * oversample_factor` hits.
    pub oversample_factor: usize,
    pub max_candidates: usize,
    pub dense_weight: f64,
    pub sparse_weight: f64,
    /// RRF damping constant `c` in `w / (c + rank)`.
    pub rrf_k: f64,
    pub max_query_chars: usize,
    /// Reranked hybrid candidates scoring at or below this are dropped.
    pub rerank_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            max_k: 20,
            oversample_factor: 4,
            max_candidates: 100,
            dense_weight: 1.0,
            sparse_weight: 1.0,
            rrf_k: 60.0,
            max_query_chars: 1000,
            rerank_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub backend_timeout_secs: u64,
    pub insufficient_context_answer: String,
    /// Must contain `{question}` and `{context}`.
    pub prompt_template: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            backend_timeout_secs: 30,
            insufficient_context_answer: DEFAULT_INSUFFICIENT_CONTEXT.to_string(),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// Pipes PDF bytes through the `pdftotext` executable.
    Pdftotext,
    /// Treats uploads as UTF-8 text; form feeds separate pages.
    Plain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_file_size_mb: u64,
    pub require_pdf: bool,
    pub max_concurrency: usize,
    pub embed_batch_size: usize,
    pub extractor: ExtractorKind,
    pub pdftotext_path: String,
    pub extract_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 50,
            require_pdf: true,
            max_concurrency: 4,
            embed_batch_size: 32,
            extractor: ExtractorKind::Pdftotext,
            pdftotext_path: "pdftotext".to_string(),
            extract_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_ttl_secs: u64,
    pub restrict_to_session: bool,
}

impl Default for SessionConfig {
    fn default() -> Self { Self { idle_ttl_secs: 3600, restrict_to_session: true } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Process-local stores; contents are lost on exit.
    Memory,
    /// tantivy + LanceDB under `data_dir`, with a persisted catalog.
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    pub data_dir: String,
    pub dense_table: String,
    pub writer_memory_bytes: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Memory,
            data_dir: "./data".to_string(),
            dense_table: "chunks".to_string(),
            writer_memory_bytes: 50_000_000,
        }
    }
}

impl IndexConfig {
    pub fn data_path(&self) -> PathBuf { expand_path(&self.data_dir) }
    pub fn tantivy_dir(&self) -> PathBuf { self.data_path().join("tantivy") }
    pub fn lancedb_dir(&self) -> PathBuf { self.data_path().join("lancedb") }
    pub fn catalog_path(&self) -> PathBuf { self.data_path().join("catalog.json") }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Local,
    Fake,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model_dir: Option<String>,
    /// Dimension for the fake and remote providers; the local model reports its own.
    pub dim: usize,
    pub max_len: usize,
    pub remote_base_url: String,
    pub remote_model: String,
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Local,
            model_dir: None,
            dim: 1024,
            max_len: 256,
            remote_base_url: "https://api.openai.com/v1".to_string(),
            remote_model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// Optional cross-encoder pass over fused hybrid candidates. Off by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub enabled: bool,
    /// OpenAI-compatible server exposing `POST {base_url}/rerank`.
    pub base_url: String,
    pub model: String,
    pub api_key_env: Option<String>,
    pub request_timeout_secs: u64,
    /// Map raw logits through a sigmoid; turn off for servers already returning probabilities.
    pub apply_sigmoid: bool,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:8080/v1".to_string(),
            model: "bge-reranker-v2-m3".to_string(),
            api_key_env: None,
            request_timeout_secs: 10,
            apply_sigmoid: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Any OpenAI-compatible `/chat/completions` endpoint (OpenAI, Groq, ...).
    Openai,
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub kind: BackendKind,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_temperature() -> f32 { 0.3 }
fn default_request_timeout() -> u64 { 60 }

pub fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig {
            name: "openai".to_string(),
            kind: BackendKind::Openai,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        },
        BackendConfig {
            name: "groq".to_string(),
            kind: BackendKind::Openai,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key_env: Some("GROQ_API_KEY".to_string()),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub synthesis: SynthesisConfig,
    pub ingest: IngestConfig,
    pub session: SessionConfig,
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
    /// Generation backends in priority order: primary first, then fallbacks.
    pub generation: Vec<BackendConfig>,
    pub rerank: RerankConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            synthesis: SynthesisConfig::default(),
            ingest: IngestConfig::default(),
            session: SessionConfig::default(),
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: default_backends(),
            rerank: RerankConfig::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        let c = &self.chunking;
        if c.target_chars == 0 { return invalid("chunking.target_chars must be > 0".into()); }
        // every non-final chunk must be longer than twice the overlap
        if c.overlap_chars * 5 >= c.target_chars * 2 {
            return invalid(format!("chunking.overlap_chars ({}) must be below 40% of target_chars ({})", c.overlap_chars, c.target_chars));
        }
        let r = &self.retrieval;
        if r.default_k == 0 || r.default_k > r.max_k { return invalid(format!("retrieval.default_k must be in 1..={}", r.max_k)); }
        if r.oversample_factor == 0 { return invalid("retrieval.oversample_factor must be >= 1".into()); }
        if r.dense_weight < 0.0 || r.sparse_weight < 0.0 || r.dense_weight + r.sparse_weight <= 0.0 {
            return invalid("retrieval weights must be non-negative and not both zero".into());
        }
        if !(r.rrf_k >= 0.0 && r.rrf_k.is_finite()) { return invalid("retrieval.rrf_k must be a finite non-negative number".into()); }
        if !(0.0..=1.0).contains(&r.rerank_threshold) { return invalid("retrieval.rerank_threshold must be within 0..=1".into()); }
        if self.rerank.enabled && self.rerank.request_timeout_secs == 0 { return invalid("rerank.request_timeout_secs must be > 0".into()); }
        let s = &self.synthesis;
        if !s.prompt_template.contains("{question}") || !s.prompt_template.contains("{context}") {
            return invalid("synthesis.prompt_template needs {question} and {context} placeholders".into());
        }
        if s.backend_timeout_secs == 0 { return invalid("synthesis.backend_timeout_secs must be > 0".into()); }
        if self.generation.len() < 2 {
            return invalid(format!("generation needs a primary and at least one fallback backend, got {}", self.generation.len()));
        }
        if self.ingest.max_concurrency == 0 || self.ingest.embed_batch_size == 0 {
            return invalid("ingest.max_concurrency and ingest.embed_batch_size must be > 0".into());
        }
        if self.ingest.extract_timeout_secs == 0 { return invalid("ingest.extract_timeout_secs must be > 0".into()); }
        if self.embedding.dim == 0 { return invalid("embedding.dim must be > 0".into()); }
        Ok(())
    }
}

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    /// Wraps an explicit figment, e.g. one built from TOML strings in tests.
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment: Figment::from(Serialized::defaults(Settings::default())).merge(figment) }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self.figment.extract().map_err(|e| anyhow::anyhow!("Failed to load settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        match env {
            "prod" | "production" => {
                let provider: EmbeddingProvider = self.get("embedding.provider")?;
                if provider == EmbeddingProvider::Fake {
                    anyhow::bail!("embedding.provider = \"fake\" is not allowed in production");
                }
            }
            "dev" | "development" | "test" | "testing" => {}
            _ => {}
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
