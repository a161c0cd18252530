//! Facade wiring extraction, chunking, the dual index, retrieval and
//! synthesis into the two caller-facing operations.
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pdfqa_core::chunker::Chunker;
use pdfqa_core::config::{IndexBackend, Settings};
use pdfqa_core::error::{Error, IngestionError};
use pdfqa_core::traits::{DenseIndex, Embedder, Generator, Reranker, SparseIndex, TextExtractor};
use pdfqa_core::types::{
    document_id_for, AnswerResult, Chunk, DenseEntry, DocumentRecord, DocumentStatus, FileFilter, RetrievalCandidate, SparseEntry, Strategy,
    UploadedFile,
};
use pdfqa_text::{MemorySparseStore, SparseEncoder, TantivySparseStore};
use pdfqa_vector::{LanceDenseStore, MemoryDenseStore};

use crate::extract::extractor_from_config;
use crate::index::{DualIndex, IndexStats};
use crate::retriever::HybridRetriever;
use crate::session::SessionRegistry;
use crate::synth::AnswerSynthesizer;

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub status: DocumentStatus,
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    /// Documents that reached `indexed`.
    pub documents_indexed: usize,
    pub total_chunks: usize,
    pub files: Vec<FileReport>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QuestionRequest {
    pub question: String,
    pub strategy: Option<String>,
    pub max_documents: Option<usize>,
    pub file_filters: Option<Vec<String>>,
    pub session_id: Option<String>,
}

impl QuestionRequest {
    pub fn new(question: impl Into<String>) -> Self { Self { question: question.into(), ..Self::default() } }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub strategies: Vec<String>,
    pub default_strategy: String,
    pub index: IndexStats,
    pub sessions: usize,
    pub backends: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranker: Option<String>,
}

pub struct RagPipeline {
    settings: Settings,
    chunker: Chunker,
    index: Arc<DualIndex>,
    embedder: Arc<dyn Embedder>,
    encoder: SparseEncoder,
    extractor: Arc<dyn TextExtractor>,
    retriever: HybridRetriever,
    synthesizer: AnswerSynthesizer,
    sessions: SessionRegistry,
}

impl RagPipeline {
    pub fn new(
        settings: Settings,
        index: Arc<DualIndex>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn TextExtractor>,
        backends: Vec<Arc<dyn Generator>>,
    ) -> Self {
        let encoder = SparseEncoder::new();
        let chunker = Chunker::with_start_seq(settings.chunking.clone(), index.next_seq());
        let retriever = HybridRetriever::new(index.clone(), embedder.clone(), encoder.clone(), settings.retrieval.clone());
        let synthesizer = AnswerSynthesizer::new(backends, settings.synthesis.clone());
        let sessions = SessionRegistry::new(Duration::from_secs(settings.session.idle_ttl_secs));
        Self { settings, chunker, index, embedder, encoder, extractor, retriever, synthesizer, sessions }
    }

    /// Builds every collaborator from configuration: stores per
    /// `index.backend`, the configured embedder, extractor, backends and
    /// the reranker when `rerank.enabled`.
    pub async fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        settings.validate()?;
        let embedder: Arc<dyn Embedder> = Arc::from(pdfqa_embed::get_default_embedder(&settings.embedding)?);
        let index = Arc::new(open_index(&settings, embedder.dim()).await?);
        let extractor: Arc<dyn TextExtractor> = Arc::from(extractor_from_config(&settings.ingest));
        let backends = pdfqa_llm::backends_from_config(&settings.generation)?;
        let reranker = pdfqa_llm::reranker_from_config(&settings.rerank)?;
        let pipeline = Self::new(settings, index, embedder, extractor, backends);
        Ok(match reranker {
            Some(reranker) => pipeline.with_reranker(reranker),
            None => pipeline,
        })
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.retriever = self.retriever.with_reranker(reranker);
        self
    }

    pub fn settings(&self) -> &Settings { &self.settings }
    pub fn index(&self) -> &Arc<DualIndex> { &self.index }
    pub fn sessions(&self) -> &SessionRegistry { &self.sessions }
    pub fn retriever(&self) -> &HybridRetriever { &self.retriever }

    /// Indexes every file independently. Per-file failures are reported in
    /// `files` and never abort the batch; only indexed documents are counted.
    pub async fn process_documents(&self, files: Vec<UploadedFile>, session_id: Option<&str>) -> Result<ProcessReport, IngestionError> {
        if files.is_empty() { return Err(IngestionError::NoFiles); }
        let total = files.len();
        let reports: Vec<FileReport> = stream::iter(files)
            .map(|file| self.process_file(file, session_id))
            .buffered(self.settings.ingest.max_concurrency)
            .collect()
            .await;
        let indexed = reports.iter().filter(|r| r.status == DocumentStatus::Indexed);
        let documents_indexed = indexed.clone().count();
        let total_chunks = indexed.map(|r| r.chunks).sum();
        let report = ProcessReport { documents_indexed, total_chunks, files: reports };
        tracing::info!(files = total, indexed = report.documents_indexed, chunks = report.total_chunks, "batch processed");
        Ok(report)
    }

    async fn process_file(&self, file: UploadedFile, session_id: Option<&str>) -> FileReport {
        let filename = file.filename.clone();
        let document_id = document_id_for(&file.filename, &file.bytes);
        let result = match self.prepare(&document_id, file).await {
            Ok((dense, sparse)) => self.index.upsert(DocumentRecord::pending(&document_id, &filename), dense, sparse).await,
            Err(e) => {
                if !matches!(e, IngestionError::InvalidUpload { .. }) {
                    self.index.record_failure(&document_id, &filename, &e.to_string());
                }
                Err(e)
            }
        };
        match result {
            Ok(record) => {
                if let Some(session) = session_id { self.sessions.record(session, &filename); }
                FileReport { filename, document_id: Some(document_id), status: DocumentStatus::Indexed, chunks: record.chunk_count, error: None }
            }
            Err(e) => {
                tracing::warn!(%filename, error = %e, "document not indexed");
                FileReport { filename, document_id: Some(document_id), status: DocumentStatus::Failed, chunks: 0, error: Some(e.to_string()) }
            }
        }
    }

    /// Validation, extraction, chunking and encoding. Nothing touches the
    /// index until this succeeds.
    async fn prepare(&self, document_id: &str, file: UploadedFile) -> Result<(Vec<DenseEntry>, Vec<SparseEntry>), IngestionError> {
        self.validate_upload(&file)?;
        let filename = file.filename;
        let pages = self
            .extractor
            .extract(&file.bytes)
            .await
            .map_err(|e| IngestionError::Unextractable { filename: filename.clone(), reason: e.to_string() })?;
        let chunks: Vec<Arc<Chunk>> = self.chunker.chunk_document(document_id, &filename, &pages).into_iter().map(Arc::new).collect();
        if chunks.is_empty() { return Err(IngestionError::EmptyDocument { filename }); }
        tracing::debug!(%filename, pages = pages.len(), chunks = chunks.len(), "chunked");

        let vectors = self.embed_chunks(&filename, &chunks).await?;
        let dense: Vec<DenseEntry> = chunks.iter().cloned().zip(vectors).map(|(chunk, vector)| DenseEntry { chunk, vector }).collect();
        let sparse: Vec<SparseEntry> = chunks.iter().map(|c| SparseEntry { chunk: c.clone(), terms: self.encoder.encode(&c.text) }).collect();
        Ok((dense, sparse))
    }

    fn validate_upload(&self, file: &UploadedFile) -> Result<(), IngestionError> {
        let invalid = |reason: String| Err(IngestionError::InvalidUpload { filename: file.filename.clone(), reason });
        if file.filename.trim().is_empty() { return invalid("missing filename".into()); }
        if file.bytes.is_empty() { return invalid("file is empty".into()); }
        let max_bytes = self.settings.ingest.max_file_size_mb.saturating_mul(1024 * 1024);
        if file.bytes.len() as u64 > max_bytes {
            return invalid(format!("{} bytes exceeds the {} MB limit", file.bytes.len(), self.settings.ingest.max_file_size_mb));
        }
        if self.settings.ingest.require_pdf && !file.bytes.starts_with(PDF_MAGIC) && !has_pdf_extension(&file.filename) {
            return invalid("only PDF files are accepted".into());
        }
        Ok(())
    }

    async fn embed_chunks(&self, filename: &str, chunks: &[Arc<Chunk>]) -> Result<Vec<Vec<f32>>, IngestionError> {
        let embedding_error = |reason: String| IngestionError::Embedding { filename: filename.to_string(), reason };
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.settings.ingest.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedder = self.embedder.clone();
            let out = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
                .await
                .map_err(|e| embedding_error(e.to_string()))?
                .map_err(|e| embedding_error(format!("{:#}", e)))?;
            if out.len() != batch.len() {
                return Err(embedding_error(format!("embedder returned {} vectors for {} chunks", out.len(), batch.len())));
            }
            vectors.extend(out);
        }
        Ok(vectors)
    }

    /// Answers from the indexed documents. Without explicit `file_filters`,
    /// a known session narrows retrieval to that session's uploads when
    /// `session.restrict_to_session` is on.
    pub async fn answer_question(&self, request: &QuestionRequest) -> Result<AnswerResult, Error> {
        let k = request.max_documents.unwrap_or(self.settings.retrieval.default_k);
        let candidates = self.search(request).await?;
        Ok(self.synthesizer.synthesize(&request.question, &candidates, k).await?)
    }

    /// Retrieval only, with the same defaults as `answer_question`.
    pub async fn search(&self, request: &QuestionRequest) -> Result<Vec<RetrievalCandidate>, Error> {
        let strategy = match request.strategy.as_deref() {
            Some(s) => s.parse::<Strategy>()?,
            None => Strategy::default(),
        };
        let k = request.max_documents.unwrap_or(self.settings.retrieval.default_k);
        let filter = self.filter_for(request);
        Ok(self.retriever.retrieve(&request.question, strategy, k, &filter).await?)
    }

    fn filter_for(&self, request: &QuestionRequest) -> FileFilter {
        match (&request.file_filters, &request.session_id) {
            (Some(files), _) if !files.is_empty() => FileFilter::only(files.iter().cloned()),
            (_, Some(session)) if self.settings.session.restrict_to_session => self.sessions.filter_for(session),
            _ => FileFilter::all(),
        }
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<usize, Error> { self.index.delete_document(document_id).await }

    pub fn status(&self) -> PipelineStatus {
        self.sessions.purge_expired();
        PipelineStatus {
            strategies: Strategy::ALL.iter().map(|s| s.to_string()).collect(),
            default_strategy: Strategy::default().to_string(),
            index: self.index.stats(),
            sessions: self.sessions.session_count(),
            backends: self.synthesizer.backend_names(),
            reranker: self.retriever.reranker_name().map(str::to_string),
        }
    }
}

fn has_pdf_extension(filename: &str) -> bool {
    Path::new(filename).extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Opens the stores selected by `index.backend`.
pub async fn open_index(settings: &Settings, dim: usize) -> anyhow::Result<DualIndex> {
    let cfg = &settings.index;
    match cfg.backend {
        IndexBackend::Memory => {
            let dense: Arc<dyn DenseIndex> = Arc::new(MemoryDenseStore::new(dim));
            let sparse: Arc<dyn SparseIndex> = Arc::new(MemorySparseStore::new());
            Ok(DualIndex::new(dense, sparse))
        }
        IndexBackend::Persistent => {
            let dense: Arc<dyn DenseIndex> = Arc::new(LanceDenseStore::open(&cfg.lancedb_dir(), &cfg.dense_table, dim).await?);
            let sparse: Arc<dyn SparseIndex> = Arc::new(TantivySparseStore::open_or_create(&cfg.tantivy_dir(), cfg.writer_memory_bytes)?);
            DualIndex::with_catalog(dense, sparse, &cfg.catalog_path())
        }
    }
}
