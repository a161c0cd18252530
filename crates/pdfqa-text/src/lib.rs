//! pdfqa-text
//!
//! Sparse side of the dual index: a term-weight encoder sharing one analyzer
//! with the tantivy schema, an in-memory BM25 store and a tantivy-backed
//! store. Both stores implement `pdfqa_core::traits::SparseIndex`.
pub mod tantivy_utils;
pub mod encoder;
pub mod memory;
pub mod index;

pub use encoder::SparseEncoder;
pub use index::TantivySparseStore;
pub use memory::MemorySparseStore;
