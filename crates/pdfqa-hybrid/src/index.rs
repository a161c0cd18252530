//! Document-atomic coordinator over the dense and sparse stores.
//!
//! A document is only ever visible through both stores or through neither.
//! Chunks are written while their document is hidden; the document is
//! published by swapping the visible set once both writes committed.
//! Readers hold the shared side of `gate` plus an immutable copy of the
//! visible set for the whole query, and discard hits of hidden documents.
//! Evictions of visible documents take the exclusive side of `gate`.
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock as StdRwLock};
use tokio::sync::{OwnedMutexGuard, RwLock, RwLockReadGuard};

use pdfqa_core::error::{Error, IngestionError, QueryError};
use pdfqa_core::traits::{DenseIndex, SparseIndex};
use pdfqa_core::types::{DenseEntry, DocumentId, DocumentRecord, DocumentStatus, FileFilter, SearchHit, SparseEntry, TermWeights};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Catalog {
    next_seq: u64,
    documents: BTreeMap<DocumentId, DocumentRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub failed: usize,
}

pub struct DualIndex {
    dense: Arc<dyn DenseIndex>,
    sparse: Arc<dyn SparseIndex>,
    gate: RwLock<()>,
    visible: StdRwLock<Arc<HashSet<DocumentId>>>,
    catalog: Mutex<Catalog>,
    catalog_path: Option<PathBuf>,
    doc_locks: DashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>,
}

impl DualIndex {
    pub fn new(dense: Arc<dyn DenseIndex>, sparse: Arc<dyn SparseIndex>) -> Self {
        Self {
            dense,
            sparse,
            gate: RwLock::new(()),
            visible: StdRwLock::new(Arc::new(HashSet::new())),
            catalog: Mutex::new(Catalog::default()),
            catalog_path: None,
            doc_locks: DashMap::new(),
        }
    }

    /// Loads (or starts) a catalog persisted at `path`. Documents recorded
    /// as indexed become visible again.
    pub fn with_catalog(dense: Arc<dyn DenseIndex>, sparse: Arc<dyn SparseIndex>, path: &Path) -> anyhow::Result<Self> {
        let mut index = Self::new(dense, sparse);
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let catalog: Catalog = serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("Corrupt catalog {}: {}", path.display(), e))?;
            let visible: HashSet<DocumentId> = catalog
                .documents
                .values()
                .filter(|r| r.status == DocumentStatus::Indexed)
                .map(|r| r.document_id.clone())
                .collect();
            tracing::info!(path = %path.display(), documents = visible.len(), "loaded catalog");
            index.visible = StdRwLock::new(Arc::new(visible));
            index.catalog = Mutex::new(catalog);
        }
        index.catalog_path = Some(path.to_path_buf());
        Ok(index)
    }

    pub fn dim(&self) -> usize { self.dense.dim() }

    /// First sequence number not used by any indexed chunk.
    pub fn next_seq(&self) -> u64 { self.lock_catalog().next_seq }

    pub fn record(&self, document_id: &str) -> Option<DocumentRecord> { self.lock_catalog().documents.get(document_id).cloned() }

    pub fn records(&self) -> Vec<DocumentRecord> { self.lock_catalog().documents.values().cloned().collect() }

    pub fn is_visible(&self, document_id: &str) -> bool { self.visible_set().contains(document_id) }

    pub fn stats(&self) -> IndexStats {
        let catalog = self.lock_catalog();
        let mut stats = IndexStats::default();
        for r in catalog.documents.values() {
            match r.status {
                DocumentStatus::Indexed => { stats.documents += 1; stats.chunks += r.chunk_count; }
                DocumentStatus::Failed => stats.failed += 1,
                DocumentStatus::Pending => {}
            }
        }
        stats
    }

    /// Records a failure that happened before any index write. An already
    /// indexed copy of the same document is left untouched.
    pub fn record_failure(&self, document_id: &str, filename: &str, reason: &str) {
        {
            let mut catalog = self.lock_catalog();
            if catalog.documents.get(document_id).is_some_and(|r| r.status == DocumentStatus::Indexed) { return; }
            let mut record = DocumentRecord::pending(document_id, filename);
            record.status = DocumentStatus::Failed;
            record.error = Some(reason.to_string());
            catalog.documents.insert(document_id.to_string(), record);
        }
        self.persist();
    }

    /// Replaces every chunk of `document` in both stores. On success the
    /// document becomes visible and is marked indexed; on failure nothing
    /// of it is visible and it is marked failed.
    pub async fn upsert(&self, document: DocumentRecord, dense: Vec<DenseEntry>, sparse: Vec<SparseEntry>) -> Result<DocumentRecord, IngestionError> {
        let id = document.document_id.clone();
        if let Some(bad) = dense.iter().find(|e| e.vector.len() != self.dense.dim()) {
            return Err(IngestionError::DimensionMismatch { expected: self.dense.dim(), actual: bad.vector.len() });
        }
        let _doc_guard = self.lock_document(&id).await;
        let chunk_count = dense.len();
        let max_seq = dense.iter().map(|e| e.chunk.seq).chain(sparse.iter().map(|e| e.chunk.seq)).max();
        self.set_record(DocumentRecord { status: DocumentStatus::Pending, chunk_count: 0, error: None, ..document.clone() });

        if let Err(e) = self.evict(&id).await {
            return Err(self.fail(&id, IngestionError::Eviction { document_id: id.clone(), reason: format!("{:#}", e) }));
        }

        if let Err(e) = self.dense.upsert(dense).await {
            let rolled_back = self.rollback(&id).await;
            tracing::warn!(document_id = %id, rolled_back, "dense write failed: {:#}", e);
            return Err(self.fail(&id, IngestionError::IndexWrite { document_id: id.clone(), store: "dense", reason: format!("{:#}", e) }));
        }
        if let Err(e) = self.sparse.upsert(sparse).await {
            let rolled_back = self.rollback(&id).await;
            tracing::error!(document_id = %id, rolled_back, "sparse write failed after dense commit: {:#}", e);
            return Err(self.fail(&id, IngestionError::PartialWrite { document_id: id.clone(), store: "sparse", reason: format!("{:#}", e), rolled_back }));
        }

        let record = DocumentRecord { status: DocumentStatus::Indexed, chunk_count, ingested_at: Utc::now(), error: None, ..document };
        {
            let mut catalog = self.lock_catalog();
            if let Some(seq) = max_seq { catalog.next_seq = catalog.next_seq.max(seq + 1); }
            catalog.documents.insert(id.clone(), record.clone());
        }
        self.publish(&id);
        self.persist();
        tracing::info!(document_id = %id, chunks = chunk_count, "document indexed");
        Ok(record)
    }

    /// Removes a document from both stores. Returns the number of chunks removed.
    pub async fn delete_document(&self, document_id: &str) -> Result<usize, Error> {
        let _doc_guard = self.lock_document(document_id).await;
        let known = self.record(document_id).is_some();
        let removed = match self.evict(document_id).await {
            Ok(n) => n,
            Err(e) => return Err(self.fail(document_id, IngestionError::Eviction { document_id: document_id.to_string(), reason: format!("{:#}", e) }).into()),
        };
        if !known && removed == 0 { return Err(Error::NotFound(format!("document {}", document_id))); }
        self.lock_catalog().documents.remove(document_id);
        self.persist();
        tracing::info!(document_id, chunks = removed, "document deleted");
        Ok(removed)
    }

    /// A consistent read view for one query.
    pub async fn snapshot(&self) -> IndexSnapshot<'_> {
        let guard = self.gate.read().await;
        IndexSnapshot { index: self, _guard: guard, visible: self.visible_set() }
    }

    pub async fn query_dense(&self, vector: &[f32], k: usize, filter: &FileFilter) -> Result<Vec<SearchHit>, QueryError> {
        self.snapshot().await.query_dense(vector, k, filter).await
    }

    pub async fn query_sparse(&self, terms: &TermWeights, k: usize, filter: &FileFilter) -> Result<Vec<SearchHit>, QueryError> {
        self.snapshot().await.query_sparse(terms, k, filter).await
    }

    /// Hides the document, then removes it from both stores under the
    /// exclusive gate. Returns the larger of the two removal counts.
    async fn evict(&self, document_id: &str) -> anyhow::Result<usize> {
        let _gate = self.gate.write().await;
        self.hide(document_id);
        let dense = self.dense.delete_document(document_id).await;
        let sparse = self.sparse.delete_document(document_id).await;
        Ok(dense?.max(sparse?))
    }

    async fn rollback(&self, document_id: &str) -> bool {
        let dense = self.dense.delete_document(document_id).await;
        let sparse = self.sparse.delete_document(document_id).await;
        if let Err(e) = &dense { tracing::error!(document_id, "dense rollback failed: {:#}", e); }
        if let Err(e) = &sparse { tracing::error!(document_id, "sparse rollback failed: {:#}", e); }
        dense.is_ok() && sparse.is_ok()
    }

    fn fail(&self, document_id: &str, err: IngestionError) -> IngestionError {
        {
            let mut catalog = self.lock_catalog();
            if let Some(r) = catalog.documents.get_mut(document_id) {
                r.status = DocumentStatus::Failed;
                r.chunk_count = 0;
                r.error = Some(err.to_string());
            }
        }
        self.persist();
        err
    }

    fn set_record(&self, record: DocumentRecord) {
        self.lock_catalog().documents.insert(record.document_id.clone(), record);
    }

    fn hide(&self, document_id: &str) {
        let mut visible = self.visible.write().unwrap_or_else(|e| e.into_inner());
        if visible.contains(document_id) {
            let mut next = (**visible).clone();
            next.remove(document_id);
            *visible = Arc::new(next);
        }
    }

    fn publish(&self, document_id: &str) {
        let mut visible = self.visible.write().unwrap_or_else(|e| e.into_inner());
        let mut next = (**visible).clone();
        next.insert(document_id.to_string());
        *visible = Arc::new(next);
    }

    fn visible_set(&self) -> Arc<HashSet<DocumentId>> { self.visible.read().unwrap_or_else(|e| e.into_inner()).clone() }

    fn lock_catalog(&self) -> std::sync::MutexGuard<'_, Catalog> { self.catalog.lock().unwrap_or_else(|e| e.into_inner()) }

    async fn lock_document(&self, document_id: &str) -> DocGuard<'_> {
        let lock = self.doc_locks.entry(document_id.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        DocGuard { locks: &self.doc_locks, document_id: document_id.to_string(), guard: Some(guard) }
    }

    /// Writes the catalog while still holding its lock, so files land in the
    /// same order as the changes they capture.
    fn persist(&self) {
        let Some(path) = &self.catalog_path else { return };
        let catalog = self.lock_catalog();
        let json = match serde_json::to_string_pretty(&*catalog) {
            Ok(json) => json,
            Err(e) => { tracing::error!("could not serialize catalog: {}", e); return; }
        };
        if let Err(e) = write_atomically(path, json.as_bytes()) {
            tracing::error!(path = %path.display(), "could not write catalog: {:#}", e);
        }
        drop(catalog);
    }
}

/// Exclusive hold on one document id. The lock entry is dropped from the
/// map once nobody else holds or waits on it.
struct DocGuard<'a> {
    locks: &'a DashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>,
    document_id: DocumentId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DocGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.remove_if(&self.document_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Read view used by the retriever so that the dense and sparse halves of
/// a hybrid query see the same set of documents.
pub struct IndexSnapshot<'a> {
    index: &'a DualIndex,
    _guard: RwLockReadGuard<'a, ()>,
    visible: Arc<HashSet<DocumentId>>,
}

impl IndexSnapshot<'_> {
    pub fn is_empty(&self) -> bool { self.visible.is_empty() }

    pub async fn query_dense(&self, vector: &[f32], k: usize, filter: &FileFilter) -> Result<Vec<SearchHit>, QueryError> {
        let expected = self.index.dense.dim();
        if vector.len() != expected { return Err(QueryError::DimensionMismatch { expected, actual: vector.len() }); }
        let dense = &self.index.dense;
        self.collect_visible(k, |limit| dense.search(vector, limit, filter)).await
    }

    pub async fn query_sparse(&self, terms: &TermWeights, k: usize, filter: &FileFilter) -> Result<Vec<SearchHit>, QueryError> {
        if terms.is_empty() { return Ok(Vec::new()); }
        let sparse = &self.index.sparse;
        self.collect_visible(k, |limit| sparse.search(terms, limit, filter)).await
    }

    /// Asks the store for `k` hits and doubles the limit until `k` visible
    /// hits are found or the store has nothing more to return.
    async fn collect_visible<F, Fut>(&self, k: usize, search: F) -> Result<Vec<SearchHit>, QueryError>
    where
        F: Fn(usize) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<Vec<SearchHit>>>,
    {
        if k == 0 || self.visible.is_empty() { return Ok(Vec::new()); }
        let mut limit = k;
        loop {
            let hits = search(limit).await.map_err(|e| QueryError::IndexUnavailable(format!("{:#}", e)))?;
            let exhausted = hits.len() < limit;
            let mut visible: Vec<SearchHit> = hits.into_iter().filter(|h| self.visible.contains(&h.chunk.document_id)).collect();
            if visible.len() >= k || exhausted {
                visible.truncate(k);
                return Ok(visible);
            }
            limit = limit.saturating_mul(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdfqa_core::types::{CharSpan, Chunk};
    use pdfqa_text::MemorySparseStore;
    use pdfqa_vector::MemoryDenseStore;

    fn one_chunk(document_id: &str) -> (DocumentRecord, Vec<DenseEntry>, Vec<SparseEntry>) {
        let chunk = Arc::new(Chunk {
            id: Chunk::make_id(document_id, 0),
            document_id: document_id.to_string(),
            chunk_index: 0,
            filename: format!("{}.pdf", document_id),
            page: 1,
            span: CharSpan { start: 0, end: 4 },
            text: "bees".to_string(),
            seq: 0,
        });
        let dense = vec![DenseEntry { chunk: chunk.clone(), vector: vec![1.0, 0.0] }];
        let sparse = vec![SparseEntry { chunk, terms: TermWeights::new([("bees", 1.0)]) }];
        (DocumentRecord::pending(document_id, &format!("{}.pdf", document_id)), dense, sparse)
    }

    #[tokio::test]
    async fn document_locks_do_not_accumulate() {
        let index = DualIndex::new(Arc::new(MemoryDenseStore::new(2)), Arc::new(MemorySparseStore::new()));
        for id in ["a", "b", "c"] {
            let (doc, dense, sparse) = one_chunk(id);
            index.upsert(doc, dense, sparse).await.unwrap();
        }
        assert_eq!(index.doc_locks.len(), 0);
        index.delete_document("a").await.unwrap();
        assert!(index.delete_document("missing").await.is_err());
        assert_eq!(index.doc_locks.len(), 0);
    }

    #[tokio::test]
    async fn waiting_writer_keeps_the_lock_entry() {
        let index = DualIndex::new(Arc::new(MemoryDenseStore::new(2)), Arc::new(MemorySparseStore::new()));
        let first = index.lock_document("a").await;
        let lock = index.doc_locks.get("a").map(|l| Arc::clone(l.value())).unwrap();
        drop(first);
        // an outside clone stands in for a second writer still waiting
        assert_eq!(index.doc_locks.len(), 1);
        drop(lock);
        let again = index.lock_document("a").await;
        drop(again);
        assert_eq!(index.doc_locks.len(), 0);
    }
}
