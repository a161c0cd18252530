#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pdfqa_core::config::Settings;
use pdfqa_core::error::GenerationError;
use pdfqa_core::traits::{Embedder, Generator, Reranker, SparseIndex};
use pdfqa_core::types::{CharSpan, Chunk, DenseEntry, DocumentRecord, FileFilter, SearchHit, SparseEntry, TermWeights};
use pdfqa_embed::FakeEmbedder;
use pdfqa_hybrid::{DualIndex, PlainTextExtractor, RagPipeline};
use pdfqa_text::{MemorySparseStore, SparseEncoder};
use pdfqa_vector::MemoryDenseStore;

pub const DIM: usize = 64;

pub enum Reply {
    Text(&'static str),
    Fail(GenerationError),
    Hang,
}

pub struct MockBackend {
    name: &'static str,
    reply: Reply,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(name: &'static str, reply: Reply) -> Arc<Self> { Arc::new(Self { name, reply, calls: AtomicUsize::new(0) }) }
    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl Generator for MockBackend {
    fn name(&self) -> &str { self.name }

    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Reply::Text(t) => Ok(t.to_string()),
            Reply::Fail(e) => Err(e.clone()),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("too late".into())
            }
        }
    }
}

/// Sparse store whose writes always fail.
#[derive(Default)]
pub struct BrokenSparse {
    inner: MemorySparseStore,
}

#[async_trait]
impl SparseIndex for BrokenSparse {
    async fn upsert(&self, _entries: Vec<SparseEntry>) -> anyhow::Result<()> { anyhow::bail!("disk full") }
    async fn delete_document(&self, document_id: &str) -> anyhow::Result<usize> { self.inner.delete_document(document_id).await }
    async fn search(&self, query: &TermWeights, k: usize, filter: &FileFilter) -> anyhow::Result<Vec<SearchHit>> {
        self.inner.search(query, k, filter).await
    }
    async fn len(&self) -> anyhow::Result<usize> { self.inner.len().await }
}

pub fn settings() -> Settings {
    let mut s = Settings::default();
    s.chunking.target_chars = 100;
    s.chunking.overlap_chars = 10;
    s.ingest.require_pdf = false;
    s.synthesis.backend_timeout_secs = 1;
    s
}

pub fn memory_index() -> (Arc<DualIndex>, Arc<MemoryDenseStore>, Arc<MemorySparseStore>) {
    let dense = Arc::new(MemoryDenseStore::new(DIM));
    let sparse = Arc::new(MemorySparseStore::new());
    let index = Arc::new(DualIndex::new(dense.clone(), sparse.clone()));
    (index, dense, sparse)
}

pub fn pipeline(backends: Vec<Arc<dyn Generator>>) -> RagPipeline {
    pipeline_with(settings(), backends)
}

pub fn pipeline_with(settings: Settings, backends: Vec<Arc<dyn Generator>>) -> RagPipeline {
    let (index, _, _) = memory_index();
    RagPipeline::new(settings, index, Arc::new(FakeEmbedder::new(DIM)), Arc::new(PlainTextExtractor), backends)
}

pub fn answering() -> Vec<Arc<dyn Generator>> {
    vec![MockBackend::new("primary", Reply::Text("From the notes.")) as Arc<dyn Generator>, MockBackend::new("fallback", Reply::Text("fallback answer"))]
}

/// Builds the dense and sparse entries of one document from raw chunk texts.
pub fn entries(document_id: &str, filename: &str, texts: &[&str], first_seq: u64) -> (DocumentRecord, Vec<DenseEntry>, Vec<SparseEntry>) {
    let embedder = FakeEmbedder::new(DIM);
    let encoder = SparseEncoder::new();
    let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
    let vectors = embedder.embed_batch(&owned).unwrap();
    let mut dense = Vec::new();
    let mut sparse = Vec::new();
    for (i, (text, vector)) in owned.iter().zip(vectors).enumerate() {
        let chunk = Arc::new(Chunk {
            id: Chunk::make_id(document_id, i),
            document_id: document_id.to_string(),
            chunk_index: i,
            filename: filename.to_string(),
            page: 1,
            span: CharSpan { start: 0, end: text.chars().count() },
            text: text.clone(),
            seq: first_seq + i as u64,
        });
        dense.push(DenseEntry { chunk: chunk.clone(), vector });
        sparse.push(SparseEntry { chunk, terms: encoder.encode(text) });
    }
    (DocumentRecord::pending(document_id, filename), dense, sparse)
}

pub async fn dense_ids(index: &DualIndex, query: &str) -> Vec<String> {
    let vector = FakeEmbedder::new(DIM).embed_batch(&[query.to_string()]).unwrap().remove(0);
    index.query_dense(&vector, 50, &FileFilter::all()).await.unwrap().into_iter().map(|h| h.chunk.id.clone()).collect()
}

pub async fn sparse_ids(index: &DualIndex, query: &str) -> Vec<String> {
    let terms = SparseEncoder::new().encode(query);
    index.query_sparse(&terms, 50, &FileFilter::all()).await.unwrap().into_iter().map(|h| h.chunk.id.clone()).collect()
}

/// Two pages of 150 characters; each splits into two windows at 100/10.
pub fn two_page_text() -> String {
    let page = "word ".repeat(30);
    format!("{}\u{000C}{}", page, page)
}


/// Scores 0.9 for documents containing any of `favoured`, else 0.2.
pub struct KeywordReranker {
    pub favoured: Vec<&'static str>,
    pub fail: bool,
    calls: AtomicUsize,
}

impl KeywordReranker {
    pub fn new(favoured: Vec<&'static str>) -> Arc<Self> { Arc::new(Self { favoured, fail: false, calls: AtomicUsize::new(0) }) }
    pub fn failing() -> Arc<Self> { Arc::new(Self { favoured: Vec::new(), fail: true, calls: AtomicUsize::new(0) }) }
    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl Reranker for KeywordReranker {
    fn name(&self) -> &str { "keyword" }

    async fn score(&self, _query: &str, documents: &[String]) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail { anyhow::bail!("reranker offline") }
        Ok(documents.iter().map(|d| if self.favoured.iter().any(|f| d.contains(f)) { 0.9 } else { 0.2 }).collect())
    }
}
