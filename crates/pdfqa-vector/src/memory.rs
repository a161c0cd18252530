use anyhow::bail;
use async_trait::async_trait;
use pdfqa_core::traits::DenseIndex;
use pdfqa_core::types::{ChunkId, DenseEntry, FileFilter, SearchHit, SourceKind};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local dense store with brute-force cosine similarity.
pub struct MemoryDenseStore {
	dim: usize,
	entries: RwLock<HashMap<ChunkId, DenseEntry>>,
}

impl MemoryDenseStore {
	pub fn new(dim: usize) -> Self { Self { dim, entries: RwLock::new(HashMap::new()) } }
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
	if na == 0.0 || nb == 0.0 { return 0.0; }
	dot / (na * nb)
}

#[async_trait]
impl DenseIndex for MemoryDenseStore {
	fn dim(&self) -> usize { self.dim }

	async fn upsert(&self, entries: Vec<DenseEntry>) -> anyhow::Result<()> {
		if let Some(bad) = entries.iter().find(|e| e.vector.len() != self.dim) {
			bail!("vector for {} has {} dimensions, store expects {}", bad.chunk.id, bad.vector.len(), self.dim);
		}
		let mut map = self.entries.write().await;
		for e in entries { map.insert(e.chunk.id.clone(), e); }
		Ok(())
	}

	async fn delete_document(&self, document_id: &str) -> anyhow::Result<usize> {
		let mut map = self.entries.write().await;
		let before = map.len();
		map.retain(|_, e| e.chunk.document_id != document_id);
		Ok(before - map.len())
	}

	async fn search(&self, query: &[f32], k: usize, filter: &FileFilter) -> anyhow::Result<Vec<SearchHit>> {
		if query.len() != self.dim { bail!("query has {} dimensions, store expects {}", query.len(), self.dim); }
		if k == 0 { return Ok(Vec::new()); }
		let map = self.entries.read().await;
		let mut hits: Vec<SearchHit> = map
			.values()
			.filter(|e| filter.allows(&e.chunk.filename))
			.map(|e| SearchHit { chunk: e.chunk.clone(), score: cosine(query, &e.vector), source: SourceKind::Dense })
			.collect();
		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.chunk.seq.cmp(&b.chunk.seq)));
		hits.truncate(k);
		Ok(hits)
	}

	async fn len(&self) -> anyhow::Result<usize> { Ok(self.entries.read().await.len()) }
}
