//! pdfqa-hybrid
//!
//! The retrieval and answer pipeline: a document-atomic coordinator over
//! the dense and sparse stores, reciprocal-rank fusion of their rankings,
//! grounded answer synthesis with backend fallback, the session file
//! registry and the `RagPipeline` facade that ties them together.
pub mod extract;
pub mod fusion;
pub mod index;
pub mod pipeline;
pub mod retriever;
pub mod session;
pub mod synth;

pub use extract::{PdftotextExtractor, PlainTextExtractor};
pub use fusion::FusionParams;
pub use index::{DualIndex, IndexSnapshot, IndexStats};
pub use pipeline::{FileReport, PipelineStatus, ProcessReport, QuestionRequest, RagPipeline};
pub use retriever::HybridRetriever;
pub use session::SessionRegistry;
pub use synth::AnswerSynthesizer;
