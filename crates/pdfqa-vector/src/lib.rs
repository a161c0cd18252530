//! pdfqa-vector
//!
//! Dense side of the dual index: a brute-force in-memory cosine store and a
//! LanceDB-backed store. Both implement `pdfqa_core::traits::DenseIndex`.
pub mod lance;
pub mod memory;
pub mod schema;
pub mod table;

pub use lance::LanceDenseStore;
pub use memory::MemoryDenseStore;
