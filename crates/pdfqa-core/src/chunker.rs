//! Splits extracted page texts into overlapping, character-bounded chunks.
//!
//! Windows are `target_chars` long; a window that stops before the end of
//! its page is pulled back to the last whitespace inside its final fifth so
//! words are not cut. Each following window starts `overlap_chars` before
//! the previous end. Windows never cross page boundaries.
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::ChunkingConfig;
use crate::types::{CharSpan, Chunk, PageText};

pub struct Chunker {
    config: ChunkingConfig,
    next_seq: AtomicU64,
}

impl Default for Chunker {
    fn default() -> Self { Self::new(ChunkingConfig::default()) }
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self { Self::with_start_seq(config, 0) }

    /// Continues global sequence numbers from `seq`, e.g. after reloading a catalog.
    pub fn with_start_seq(config: ChunkingConfig, seq: u64) -> Self {
        Self { config, next_seq: AtomicU64::new(seq) }
    }

    pub fn config(&self) -> &ChunkingConfig { &self.config }

    /// Produces the chunks of one document in page order. Whitespace-only
    /// windows are skipped, so empty input yields no chunks.
    pub fn chunk_document(&self, document_id: &str, filename: &str, pages: &[PageText]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for page in pages {
            let offsets: Vec<usize> = page.text.char_indices().map(|(b, _)| b).chain(std::iter::once(page.text.len())).collect();
            for span in window_spans(&page.text, self.config.target_chars, self.config.overlap_chars) {
                let text = &page.text[offsets[span.start]..offsets[span.end]];
                if text.trim().is_empty() { continue; }
                let chunk_index = chunks.len();
                chunks.push(Chunk {
                    id: Chunk::make_id(document_id, chunk_index),
                    document_id: document_id.to_string(),
                    chunk_index,
                    filename: filename.to_string(),
                    page: page.page,
                    span,
                    text: text.to_string(),
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                });
            }
        }
        chunks
    }
}

/// Character spans of the windows over `text`. The union of the spans is
/// the whole text; consecutive spans share exactly `overlap` characters.
pub fn window_spans(text: &str, target: usize, overlap: usize) -> Vec<CharSpan> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    if n == 0 || target == 0 { return Vec::new(); }
    let mut spans = Vec::new();
    let mut start = 0usize;
    loop {
        let mut end = (start + target).min(n);
        if end < n {
            let floor = end.saturating_sub(target / 5).max(start + 1);
            if let Some(pos) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) { end = pos + 1; }
        }
        spans.push(CharSpan { start, end });
        if end >= n { break; }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    spans
}
