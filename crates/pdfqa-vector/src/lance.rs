use anyhow::{anyhow, bail, Context, Result};
use arrow_array::{Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray, UInt64Array};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::path::Path;
use std::sync::Arc;

use pdfqa_core::traits::DenseIndex;
use pdfqa_core::types::{CharSpan, Chunk, DenseEntry, FileFilter, SearchHit, SourceKind};

use crate::schema::{build_chunk_schema, vector_dim};
use crate::table::{ensure_table, open_db, sql_in, sql_literal};

/// Dense store backed by a LanceDB table. Scores are `1 - cosine distance`.
pub struct LanceDenseStore {
	db: Connection,
	table_name: String,
	dim: usize,
}

impl LanceDenseStore {
	pub async fn open(db_path: &Path, table_name: &str, dim: usize) -> Result<Self> {
		std::fs::create_dir_all(db_path)?;
		let db = open_db(db_path.to_string_lossy().as_ref()).await?;
		ensure_table(&db, table_name, build_chunk_schema(dim)).await?;
		let store = Self { db, table_name: table_name.to_string(), dim };
		let schema = store.table().await?.schema().await?;
		match vector_dim(&schema) {
			Some(d) if d == dim => Ok(store),
			Some(d) => bail!("table '{}' stores {}-dimensional vectors, configured dimension is {}", table_name, d, dim),
			None => bail!("table '{}' has no vector column", table_name),
		}
	}

	async fn table(&self) -> Result<Table> {
		Ok(self.db.open_table(&self.table_name).execute().await?)
	}

	fn to_record_batch(&self, entries: &[DenseEntry]) -> Result<RecordBatch> {
		let vectors = entries.iter().map(|e| Some(e.vector.iter().map(|&x| Some(x)).collect::<Vec<_>>()));
		let batch = RecordBatch::try_new(build_chunk_schema(self.dim), vec![
			string_column(entries, |c| c.id.clone()),
			string_column(entries, |c| c.document_id.clone()),
			string_column(entries, |c| c.filename.clone()),
			u64_column(entries, |c| c.chunk_index as u64),
			u64_column(entries, |c| c.page as u64),
			u64_column(entries, |c| c.span.start as u64),
			u64_column(entries, |c| c.span.end as u64),
			u64_column(entries, |c| c.seq),
			string_column(entries, |c| c.text.clone()),
			Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors, self.dim as i32)),
		])?;
		Ok(batch)
	}
}

fn string_column(entries: &[DenseEntry], f: impl Fn(&Chunk) -> String) -> ArrayRef {
	Arc::new(StringArray::from(entries.iter().map(|e| f(&e.chunk)).collect::<Vec<_>>()))
}

fn u64_column(entries: &[DenseEntry], f: impl Fn(&Chunk) -> u64) -> ArrayRef {
	Arc::new(UInt64Array::from(entries.iter().map(|e| f(&e.chunk)).collect::<Vec<_>>()))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
	batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<T>()).ok_or_else(|| anyhow!("column '{}' missing or mistyped", name))
}

fn filter_predicate(filter: &FileFilter) -> Option<String> {
	if filter.is_unrestricted() { None } else { Some(sql_in("filename", filter.names())) }
}

fn batch_to_hits(batch: &RecordBatch, out: &mut Vec<SearchHit>) -> Result<()> {
	let chunk_id = column::<StringArray>(batch, "chunk_id")?;
	let document_id = column::<StringArray>(batch, "document_id")?;
	let filename = column::<StringArray>(batch, "filename")?;
	let chunk_index = column::<UInt64Array>(batch, "chunk_index")?;
	let page = column::<UInt64Array>(batch, "page")?;
	let span_start = column::<UInt64Array>(batch, "span_start")?;
	let span_end = column::<UInt64Array>(batch, "span_end")?;
	let seq = column::<UInt64Array>(batch, "seq")?;
	let text = column::<StringArray>(batch, "text")?;
	let distance = column::<Float32Array>(batch, "_distance")?;
	for i in 0..batch.num_rows() {
		let chunk = Chunk {
			id: chunk_id.value(i).to_string(),
			document_id: document_id.value(i).to_string(),
			chunk_index: chunk_index.value(i) as usize,
			filename: filename.value(i).to_string(),
			page: page.value(i) as u32,
			span: CharSpan { start: span_start.value(i) as usize, end: span_end.value(i) as usize },
			text: text.value(i).to_string(),
			seq: seq.value(i),
		};
		let score = if distance.is_null(i) { 0.0 } else { 1.0 - distance.value(i) };
		out.push(SearchHit { chunk: Arc::new(chunk), score, source: SourceKind::Dense });
	}
	Ok(())
}

#[async_trait]
impl DenseIndex for LanceDenseStore {
	fn dim(&self) -> usize { self.dim }

	async fn upsert(&self, entries: Vec<DenseEntry>) -> Result<()> {
		if entries.is_empty() { return Ok(()); }
		if let Some(bad) = entries.iter().find(|e| e.vector.len() != self.dim) {
			bail!("vector for {} has {} dimensions, store expects {}", bad.chunk.id, bad.vector.len(), self.dim);
		}
		let table = self.table().await?;
		// replaces any earlier copy of the same chunks
		table.delete(&sql_in("chunk_id", entries.iter().map(|e| e.chunk.id.as_str()))).await?;
		let batch = self.to_record_batch(&entries)?;
		let schema = batch.schema();
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
		table.add(reader).execute().await.context("Failed to add rows to LanceDB")?;
		tracing::debug!(chunks = entries.len(), table = %self.table_name, "lance upsert committed");
		Ok(())
	}

	async fn delete_document(&self, document_id: &str) -> Result<usize> {
		let table = self.table().await?;
		let predicate = format!("document_id = {}", sql_literal(document_id));
		let removed = table.count_rows(Some(predicate.clone())).await?;
		if removed > 0 { table.delete(&predicate).await?; }
		Ok(removed)
	}

	async fn search(&self, query: &[f32], k: usize, filter: &FileFilter) -> Result<Vec<SearchHit>> {
		if query.len() != self.dim { bail!("query has {} dimensions, store expects {}", query.len(), self.dim); }
		if k == 0 { return Ok(Vec::new()); }
		let table = self.table().await?;
		let mut q = table.vector_search(query.to_vec())?.distance_type(DistanceType::Cosine).limit(k);
		if let Some(predicate) = filter_predicate(filter) { q = q.only_if(predicate); }
		let mut stream = q.execute().await.context("Vector search failed")?;
		let mut hits = Vec::new();
		while let Some(batch) = stream.try_next().await? { batch_to_hits(&batch, &mut hits)?; }
		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.chunk.seq.cmp(&b.chunk.seq)));
		hits.truncate(k);
		Ok(hits)
	}

	async fn len(&self) -> Result<usize> { Ok(self.table().await?.count_rows(None).await?) }
}
