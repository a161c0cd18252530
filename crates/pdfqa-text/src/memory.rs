use async_trait::async_trait;
use pdfqa_core::traits::SparseIndex;
use pdfqa_core::types::{ChunkId, FileFilter, SearchHit, SourceKind, SparseEntry, TermWeights};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local sparse store scoring stored term weights with Okapi BM25.
pub struct MemorySparseStore {
	entries: RwLock<HashMap<ChunkId, SparseEntry>>,
	k1: f32,
	b: f32,
}

impl Default for MemorySparseStore {
	fn default() -> Self { Self::with_params(1.2, 0.75) }
}

impl MemorySparseStore {
	pub fn new() -> Self { Self::default() }

	pub fn with_params(k1: f32, b: f32) -> Self {
		Self { entries: RwLock::new(HashMap::new()), k1, b }
	}
}

fn idf(n: usize, df: usize) -> f32 {
	let (n, df) = (n as f32, df as f32);
	(1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

#[async_trait]
impl SparseIndex for MemorySparseStore {
	async fn upsert(&self, entries: Vec<SparseEntry>) -> anyhow::Result<()> {
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

	async fn search(&self, query: &TermWeights, k: usize, filter: &FileFilter) -> anyhow::Result<Vec<SearchHit>> {
		if k == 0 || query.is_empty() { return Ok(Vec::new()); }
		let map = self.entries.read().await;
		let n = map.len();
		if n == 0 { return Ok(Vec::new()); }
		// corpus statistics cover the whole store; the filter only restricts results
		let avgdl = map.values().map(|e| e.terms.total()).sum::<f32>() / n as f32;
		let df: HashMap<&str, usize> = query
			.iter()
			.map(|(t, _)| (t, map.values().filter(|e| e.terms.get(t).is_some()).count()))
			.collect();

		let mut hits: Vec<SearchHit> = Vec::new();
		for e in map.values() {
			if !filter.allows(&e.chunk.filename) { continue; }
			let dl = e.terms.total();
			let norm = self.k1 * (1.0 - self.b + self.b * dl / avgdl.max(f32::EPSILON));
			let mut score = 0.0f32;
			for (term, qw) in query.iter() {
				let Some(tf) = e.terms.get(term) else { continue };
				let df = df.get(term).copied().unwrap_or(0);
				score += qw * idf(n, df) * (tf * (self.k1 + 1.0)) / (tf + norm);
			}
			if score > 0.0 {
				hits.push(SearchHit { chunk: e.chunk.clone(), score, source: SourceKind::Sparse });
			}
		}
		hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then(a.chunk.seq.cmp(&b.chunk.seq)));
		hits.truncate(k);
		Ok(hits)
	}

	async fn len(&self) -> anyhow::Result<usize> { Ok(self.entries.read().await.len()) }
}
