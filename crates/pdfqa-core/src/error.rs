use std::time::Duration;
use thiserror::Error;

/// Failures while turning one uploaded file into indexed chunks. Always
/// reported per file; a batch never fails as a whole because of one file.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("No files provided for upload")]
    NoFiles,

    #[error("Invalid upload '{filename}': {reason}")]
    InvalidUpload { filename: String, reason: String },

    #[error("Could not extract text from '{filename}': {reason}")]
    Unextractable { filename: String, reason: String },

    #[error("No text content in '{filename}'")]
    EmptyDocument { filename: String },

    #[error("Embedding failed for '{filename}': {reason}")]
    Embedding { filename: String, reason: String },

    #[error("Embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Could not evict previous chunks of {document_id}: {reason}")]
    Eviction { document_id: String, reason: String },

    #[error("{store} write failed for {document_id}: {reason}")]
    IndexWrite { document_id: String, store: &'static str, reason: String },

    #[error("Partial write of {document_id} ({store} side failed: {reason}); rolled back: {rolled_back}")]
    PartialWrite { document_id: String, store: &'static str, reason: String, rolled_back: bool },
}

/// Caller or index errors on the query path. Surfaced immediately, never retried.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Unknown search strategy '{0}'. Available: dense, sparse, hybrid")]
    InvalidStrategy(String),

    #[error("Invalid number of results {k}: must be between 1 and {max}")]
    InvalidK { k: usize, max: usize },

    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error("Query embedding failed: {0}")]
    Embedding(String),

    #[error("Query embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),
}

/// A single generation backend failure. Each one moves synthesis to the next backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("empty response")]
    Empty,

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub backend: String,
    pub error: GenerationError,
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("No generation backends configured")]
    NoBackends,

    #[error("All {} generation backends failed: {}", .attempts.len(), describe(.attempts))]
    AllBackendsFailed { attempts: Vec<BackendFailure> },
}

fn describe(attempts: &[BackendFailure]) -> String {
    attempts.iter().map(|a| format!("{}: {}", a.backend, a.error)).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unextractable document: {0}")]
    Unextractable(String),

    #[error("extractor I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}

pub type Result<T> = std::result::Result<T, Error>;
