use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub const VECTOR_COLUMN: &str = "vector";

/// One row per chunk: the chunk's metadata and text next to its embedding,
/// so a hit can be turned back into a full `Chunk` without a second lookup.
pub fn build_chunk_schema(dim: usize) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("chunk_id", DataType::Utf8, false),
		Field::new("document_id", DataType::Utf8, false),
		Field::new("filename", DataType::Utf8, false),
		Field::new("chunk_index", DataType::UInt64, false),
		Field::new("page", DataType::UInt64, false),
		Field::new("span_start", DataType::UInt64, false),
		Field::new("span_end", DataType::UInt64, false),
		Field::new("seq", DataType::UInt64, false),
		Field::new("text", DataType::Utf8, false),
		Field::new(VECTOR_COLUMN, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32), true),
	]))
}

/// Vector length declared by a table schema, if it has a vector column.
pub fn vector_dim(schema: &Schema) -> Option<usize> {
	match schema.field_with_name(VECTOR_COLUMN).ok()?.data_type() {
		DataType::FixedSizeList(_, n) => Some(*n as usize),
		_ => None,
	}
}
