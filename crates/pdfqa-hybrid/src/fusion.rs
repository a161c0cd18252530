//! Weighted reciprocal-rank fusion of the dense and sparse rankings.
//!
//! A candidate scores `w_d / (c + rank_d) + w_s / (c + rank_s)` with 1-based
//! ranks; a list it is missing from contributes nothing. Ties are ordered by
//! presence in both lists, then the better dense rank, then the chunk's
//! global sequence number, so identical inputs always fuse identically.
use std::cmp::Ordering;
use std::collections::HashMap;

use pdfqa_core::config::RetrievalConfig;
use pdfqa_core::types::{RetrievalCandidate, SearchHit, SourceKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub dense_weight: f64,
    pub sparse_weight: f64,
    pub rrf_k: f64,
}

impl Default for FusionParams {
    fn default() -> Self { Self { dense_weight: 1.0, sparse_weight: 1.0, rrf_k: 60.0 } }
}

impl From<&RetrievalConfig> for FusionParams {
    fn from(c: &RetrievalConfig) -> Self { Self { dense_weight: c.dense_weight, sparse_weight: c.sparse_weight, rrf_k: c.rrf_k } }
}

fn reciprocal(rrf_k: f64, rank: usize) -> f64 { 1.0 / (rrf_k + rank as f64) }

pub fn fuse(dense: &[SearchHit], sparse: &[SearchHit], params: &FusionParams, k: usize) -> Vec<RetrievalCandidate> {
    let mut by_id: HashMap<&str, RetrievalCandidate> = HashMap::with_capacity(dense.len() + sparse.len());
    for (i, hit) in dense.iter().enumerate() {
        let rank = i + 1;
        let c = by_id.entry(hit.chunk.id.as_str()).or_insert_with(|| empty_candidate(hit));
        // a store returns each chunk at most once; keep the first rank if not
        if c.dense_rank.is_some() { continue; }
        c.dense_rank = Some(rank);
        c.dense_score = Some(hit.score);
        c.fused_score += params.dense_weight * reciprocal(params.rrf_k, rank);
    }
    for (i, hit) in sparse.iter().enumerate() {
        let rank = i + 1;
        let c = by_id.entry(hit.chunk.id.as_str()).or_insert_with(|| empty_candidate(hit));
        if c.sparse_rank.is_some() { continue; }
        c.sparse_rank = Some(rank);
        c.sparse_score = Some(hit.score);
        c.fused_score += params.sparse_weight * reciprocal(params.rrf_k, rank);
    }
    let mut out: Vec<RetrievalCandidate> = by_id.into_values().collect();
    out.sort_by(compare);
    out.truncate(k);
    out
}

/// Candidates from a single list, in that list's order.
pub fn single(hits: &[SearchHit], rrf_k: f64, k: usize) -> Vec<RetrievalCandidate> {
    hits.iter()
        .take(k)
        .enumerate()
        .map(|(i, hit)| {
            let rank = i + 1;
            let mut c = empty_candidate(hit);
            match hit.source {
                SourceKind::Dense => { c.dense_rank = Some(rank); c.dense_score = Some(hit.score); }
                SourceKind::Sparse => { c.sparse_rank = Some(rank); c.sparse_score = Some(hit.score); }
            }
            c.fused_score = reciprocal(rrf_k, rank);
            c
        })
        .collect()
}

fn empty_candidate(hit: &SearchHit) -> RetrievalCandidate {
    RetrievalCandidate { chunk: hit.chunk.clone(), dense_rank: None, dense_score: None, sparse_rank: None, sparse_score: None, fused_score: 0.0, rerank_score: None }
}

fn compare(a: &RetrievalCandidate, b: &RetrievalCandidate) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| b.in_both().cmp(&a.in_both()))
        .then_with(|| rank_key(a.dense_rank).cmp(&rank_key(b.dense_rank)))
        .then_with(|| a.chunk.seq.cmp(&b.chunk.seq))
        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

fn rank_key(rank: Option<usize>) -> usize { rank.unwrap_or(usize::MAX) }
