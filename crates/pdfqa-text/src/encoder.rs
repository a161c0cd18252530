use pdfqa_core::types::TermWeights;
use std::collections::BTreeMap;
use tantivy::tokenizer::TextAnalyzer;

use crate::tantivy_utils::analyzer;

/// Turns text into raw term-frequency weights, using the same analyzer the
/// tantivy store indexes with so both sparse stores agree on terms.
#[derive(Clone)]
pub struct SparseEncoder {
	analyzer: TextAnalyzer,
}

impl Default for SparseEncoder {
	fn default() -> Self { Self { analyzer: analyzer() } }
}

impl SparseEncoder {
	pub fn new() -> Self { Self::default() }

	pub fn tokens(&self, text: &str) -> Vec<String> {
		let mut analyzer = self.analyzer.clone();
		let mut stream = analyzer.token_stream(text);
		let mut out = Vec::new();
		while stream.advance() { out.push(stream.token().text.clone()); }
		out
	}

	/// Empty when the text has no indexable terms (only stop words or punctuation).
	pub fn encode(&self, text: &str) -> TermWeights {
		let mut counts: BTreeMap<String, f32> = BTreeMap::new();
		for t in self.tokens(text) { *counts.entry(t).or_insert(0.0) += 1.0; }
		TermWeights::from(counts)
	}
}
