//! Domain types shared by the chunker, both index sides, the retriever and
//! the answer synthesizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::QueryError;

pub type ChunkId = String;
pub type DocumentId = String;

/// Plain text of one page as yielded by a text extractor. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page: u32,
    pub text: String,
}

impl PageText {
    pub fn new(page: u32, text: impl Into<String>) -> Self { Self { page, text: text.into() } }
}

/// Half-open character range `[start, end)` within a page's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn len(&self) -> usize { self.end.saturating_sub(self.start) }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// A retrievable unit of a document.
///
/// - `id`: `"{document_id}:{chunk_index}"`, unique across the index
/// - `span`: character offsets of `text` within page `page`
/// - `seq`: global, monotonically increasing sequence number; final
///   tie-break when ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub chunk_index: usize,
    pub filename: String,
    pub page: u32,
    pub span: CharSpan,
    pub text: String,
    pub seq: u64,
}

impl Chunk {
    pub fn make_id(document_id: &str, chunk_index: usize) -> ChunkId { format!("{}:{}", document_id, chunk_index) }
}

/// Stable document identity derived from the filename and a content hash,
/// so the same upload always maps to the same id.
pub fn document_id_for(filename: &str, bytes: &[u8]) -> DocumentId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(filename.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(bytes);
    let hash = hasher.finalize().to_hex();
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}-{}", if stem.is_empty() { "doc" } else { stem.as_str() }, &hash.as_str()[..16])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Indexed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: DocumentId,
    pub filename: String,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentRecord {
    pub fn pending(document_id: &str, filename: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            filename: filename.to_string(),
            chunk_count: 0,
            ingested_at: Utc::now(),
            status: DocumentStatus::Pending,
            error: None,
        }
    }
}

/// Sparse term-weight map. Holds only finite, strictly positive weights.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, f32>", into = "BTreeMap<String, f32>")]
pub struct TermWeights(BTreeMap<String, f32>);

impl TermWeights {
    pub fn new<I, S>(weights: I) -> Self
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (term, w) in weights {
            if w.is_finite() && w > 0.0 { map.insert(term.into(), w); }
        }
        Self(map)
    }

    pub fn get(&self, term: &str) -> Option<f32> { self.0.get(term).copied() }
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> { self.0.iter().map(|(t, w)| (t.as_str(), *w)) }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    /// Sum of all weights; the document length used by BM25 normalisation.
    pub fn total(&self) -> f32 { self.0.values().sum() }
}

impl From<BTreeMap<String, f32>> for TermWeights {
    fn from(map: BTreeMap<String, f32>) -> Self { Self::new(map) }
}

impl From<TermWeights> for BTreeMap<String, f32> {
    fn from(w: TermWeights) -> Self { w.0 }
}

/// Dense index entry. Vector length must equal the store's dimension.
#[derive(Debug, Clone)]
pub struct DenseEntry {
    pub chunk: Arc<Chunk>,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct SparseEntry {
    pub chunk: Arc<Chunk>,
    pub terms: TermWeights,
}

/// Indicates which index produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Dense,
    Sparse,
}

/// The minimal surface returned by both index sides. `score` is
/// store-specific but higher is always better.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk: Arc<Chunk>,
    pub score: f32,
    pub source: SourceKind,
}

/// Filename restriction for queries. An empty filter does not restrict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFilter(BTreeSet<String>);

impl FileFilter {
    pub fn all() -> Self { Self::default() }
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }
    pub fn is_unrestricted(&self) -> bool { self.0.is_empty() }
    pub fn allows(&self, filename: &str) -> bool { self.0.is_empty() || self.0.contains(filename) }
    pub fn names(&self) -> impl Iterator<Item = &str> { self.0.iter().map(String::as_str) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Dense,
    Sparse,
    #[default]
    Hybrid,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Dense, Strategy::Sparse, Strategy::Hybrid];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Dense => "dense",
            Strategy::Sparse => "sparse",
            Strategy::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Strategy {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dense" => Ok(Strategy::Dense),
            "sparse" => Ok(Strategy::Sparse),
            "hybrid" => Ok(Strategy::Hybrid),
            _ => Err(QueryError::InvalidStrategy(s.to_string())),
        }
    }
}

/// One fused retrieval result. Ranks are 1-based; `None` means the chunk
/// did not appear in that list.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalCandidate {
    pub chunk: Arc<Chunk>,
    pub dense_rank: Option<usize>,
    pub dense_score: Option<f32>,
    pub sparse_rank: Option<usize>,
    pub sparse_score: Option<f32>,
    pub fused_score: f64,
    /// Set when a reranker scored this candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl RetrievalCandidate {
    pub fn in_both(&self) -> bool { self.dense_rank.is_some() && self.sparse_rank.is_some() }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub references: Vec<String>,
    /// Generator that produced the answer; `None` when no context matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self { filename: filename.into(), bytes: bytes.into() }
    }
}
