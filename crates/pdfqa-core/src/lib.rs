//! pdfqa-core
//!
//! Domain types, the error taxonomy, collaborator traits, Figment-backed
//! configuration and the page chunker shared by every other crate.

pub mod chunker;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;
