use async_trait::async_trait;

use crate::error::{ExtractError, GenerationError};
use crate::types::{DenseEntry, FileFilter, PageText, SearchHit, SparseEntry, TermWeights};

/// Embedding collaborator. Vectors are L2-normalised and always `dim()` long.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Dense (embedding similarity) side of the dual index.
#[async_trait]
pub trait DenseIndex: Send + Sync {
    fn dim(&self) -> usize;
    async fn upsert(&self, entries: Vec<DenseEntry>) -> anyhow::Result<()>;
    /// Removes every entry of the document; returns how many were removed.
    async fn delete_document(&self, document_id: &str) -> anyhow::Result<usize>;
    async fn search(&self, query: &[f32], k: usize, filter: &FileFilter) -> anyhow::Result<Vec<SearchHit>>;
    async fn len(&self) -> anyhow::Result<usize>;
}

/// Sparse (term-weighted) side of the dual index.
#[async_trait]
pub trait SparseIndex: Send + Sync {
    async fn upsert(&self, entries: Vec<SparseEntry>) -> anyhow::Result<()>;
    async fn delete_document(&self, document_id: &str) -> anyhow::Result<usize>;
    async fn search(&self, query: &TermWeights, k: usize, filter: &FileFilter) -> anyhow::Result<Vec<SearchHit>>;
    async fn len(&self) -> anyhow::Result<usize>;
}

/// Text extraction / OCR collaborator: raw document bytes to ordered page texts.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError>;
}

/// Generation backend. Retries and backoff, if any, belong to the implementation.
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Cross-encoder relevance scoring for fused candidates. Returns one score
/// in `0.0..=1.0` per document, in input order.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;
    async fn score(&self, query: &str, documents: &[String]) -> anyhow::Result<Vec<f32>>;
}
