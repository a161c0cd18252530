use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::indexer::UserOperation;
use tantivy::query::{BooleanQuery, BoostQuery, ConstScoreQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::Mutex;

use pdfqa_core::traits::SparseIndex;
use pdfqa_core::types::{CharSpan, Chunk, FileFilter, SearchHit, SourceKind, SparseEntry, TermWeights};

use crate::tantivy_utils::{build_schema, register_tokenizer};

struct Fields {
	chunk_id: Field,
	document_id: Field,
	filename: Field,
	chunk_index: Field,
	page: Field,
	span_start: Field,
	span_end: Field,
	seq: Field,
	text: Field,
}

/// Sparse store backed by a tantivy index (in RAM or in a directory).
/// Ranking is tantivy's BM25 over the chunk text; query term weights become
/// term boosts.
pub struct TantivySparseStore {
	index: Index,
	reader: IndexReader,
	writer: Mutex<IndexWriter>,
	f: Fields,
}

impl TantivySparseStore {
	pub fn in_memory(writer_memory_bytes: usize) -> Result<Self> {
		let index = Index::create_in_ram(build_schema());
		Self::from_index(index, writer_memory_bytes)
	}

	pub fn open_or_create(index_dir: &Path, writer_memory_bytes: usize) -> Result<Self> {
		std::fs::create_dir_all(index_dir)?;
		let dir = MmapDirectory::open(index_dir).context("Failed to open tantivy directory")?;
		let index = Index::open_or_create(dir, build_schema()).context("Failed to open or create tantivy index")?;
		Self::from_index(index, writer_memory_bytes)
	}

	fn from_index(index: Index, writer_memory_bytes: usize) -> Result<Self> {
		register_tokenizer(&index);
		let schema = index.schema();
		let f = Fields {
			chunk_id: schema.get_field("chunk_id")?,
			document_id: schema.get_field("document_id")?,
			filename: schema.get_field("filename")?,
			chunk_index: schema.get_field("chunk_index")?,
			page: schema.get_field("page")?,
			span_start: schema.get_field("span_start")?,
			span_end: schema.get_field("span_end")?,
			seq: schema.get_field("seq")?,
			text: schema.get_field("text")?,
		};
		let writer: IndexWriter = index.writer(writer_memory_bytes).context("Failed to create index writer")?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().context("Failed to create reader")?;
		Ok(Self { index, reader, writer: Mutex::new(writer), f })
	}

	pub fn index(&self) -> &Index { &self.index }

	fn count_term(&self, field: Field, value: &str) -> Result<usize> {
		let q = TermQuery::new(Term::from_field_text(field, value), IndexRecordOption::Basic);
		Ok(self.reader.searcher().search(&q, &Count)?)
	}

	fn build_query(&self, terms: &TermWeights, filter: &FileFilter) -> Box<dyn Query> {
		let should: Vec<(Occur, Box<dyn Query>)> = terms
			.iter()
			.map(|(t, w)| {
				let tq = TermQuery::new(Term::from_field_text(self.f.text, t), IndexRecordOption::WithFreqs);
				(Occur::Should, Box::new(BoostQuery::new(Box::new(tq), w)) as Box<dyn Query>)
			})
			.collect();
		let terms_query: Box<dyn Query> = Box::new(BooleanQuery::new(should));
		if filter.is_unrestricted() { return terms_query; }
		let names: Vec<(Occur, Box<dyn Query>)> = filter
			.names()
			.map(|n| (Occur::Should, Box::new(TermQuery::new(Term::from_field_text(self.f.filename, n), IndexRecordOption::Basic)) as Box<dyn Query>))
			.collect();
		let filter_query: Box<dyn Query> = Box::new(ConstScoreQuery::new(Box::new(BooleanQuery::new(names)), 0.0));
		Box::new(BooleanQuery::new(vec![(Occur::Must, terms_query), (Occur::Must, filter_query)]))
	}

	fn to_chunk(&self, doc: &TantivyDocument) -> Chunk {
		let s = |f: Field| doc.get_first(f).and_then(|v| v.as_str()).unwrap_or_default().to_string();
		let u = |f: Field| doc.get_first(f).and_then(|v| v.as_u64()).unwrap_or(0);
		Chunk {
			id: s(self.f.chunk_id),
			document_id: s(self.f.document_id),
			chunk_index: u(self.f.chunk_index) as usize,
			filename: s(self.f.filename),
			page: u(self.f.page) as u32,
			span: CharSpan { start: u(self.f.span_start) as usize, end: u(self.f.span_end) as usize },
			text: s(self.f.text),
			seq: u(self.f.seq),
		}
	}
}

#[async_trait]
impl SparseIndex for TantivySparseStore {
	async fn upsert(&self, entries: Vec<SparseEntry>) -> Result<()> {
		if entries.is_empty() { return Ok(()); }
		let mut ops = Vec::with_capacity(entries.len() * 2);
		for e in &entries {
			let c = &e.chunk;
			// replaces any earlier copy of the same chunk
			ops.push(UserOperation::Delete(Term::from_field_text(self.f.chunk_id, &c.id)));
			ops.push(UserOperation::Add(doc!(
				self.f.chunk_id => c.id.clone(),
				self.f.document_id => c.document_id.clone(),
				self.f.filename => c.filename.clone(),
				self.f.chunk_index => c.chunk_index as u64,
				self.f.page => c.page as u64,
				self.f.span_start => c.span.start as u64,
				self.f.span_end => c.span.end as u64,
				self.f.seq => c.seq,
				self.f.text => c.text.clone(),
			)));
		}
		let mut writer = self.writer.lock().await;
		// one batch, so a failure never leaves half a document queued
		if let Err(e) = writer.run(ops) {
			writer.rollback()?;
			return Err(e).context("Failed to queue sparse upsert");
		}
		if let Err(e) = writer.commit() {
			writer.rollback()?;
			return Err(e).context("Failed to commit sparse upsert");
		}
		self.reader.reload()?;
		tracing::debug!(chunks = entries.len(), "tantivy upsert committed");
		Ok(())
	}

	async fn delete_document(&self, document_id: &str) -> Result<usize> {
		let mut writer = self.writer.lock().await;
		let removed = self.count_term(self.f.document_id, document_id)?;
		// committed anyway: the term also drops uncommitted leftovers of the document
		writer.delete_term(Term::from_field_text(self.f.document_id, document_id));
		writer.commit().context("Failed to commit delete")?;
		self.reader.reload()?;
		Ok(removed)
	}

	async fn search(&self, query: &TermWeights, k: usize, filter: &FileFilter) -> Result<Vec<SearchHit>> {
		if k == 0 || query.is_empty() { return Ok(Vec::new()); }
		let searcher = self.reader.searcher();
		let q = self.build_query(query, filter);
		let top_docs = searcher.search(&q, &TopDocs::with_limit(k)).context("Search failed")?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			hits.push(SearchHit { chunk: Arc::new(self.to_chunk(&doc)), score, source: SourceKind::Sparse });
		}
		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.chunk.seq.cmp(&b.chunk.seq)));
		Ok(hits)
	}

	async fn len(&self) -> Result<usize> { Ok(self.reader.searcher().num_docs() as usize) }
}
