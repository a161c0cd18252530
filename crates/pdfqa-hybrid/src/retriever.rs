use std::sync::Arc;

use pdfqa_core::config::RetrievalConfig;
use pdfqa_core::error::QueryError;
use pdfqa_core::traits::{Embedder, Reranker};
use pdfqa_core::types::{FileFilter, RetrievalCandidate, Strategy};
use pdfqa_text::SparseEncoder;

use crate::fusion::{self, FusionParams};
use crate::index::DualIndex;

/// Runs a question against one or both index sides and fuses the results.
pub struct HybridRetriever {
    index: Arc<DualIndex>,
    embedder: Arc<dyn Embedder>,
    encoder: SparseEncoder,
    config: RetrievalConfig,
    reranker: Option<Arc<dyn Reranker>>,
}

impl HybridRetriever {
    pub fn new(index: Arc<DualIndex>, embedder: Arc<dyn Embedder>, encoder: SparseEncoder, config: RetrievalConfig) -> Self {
        Self { index, embedder, encoder, config, reranker: None }
    }

    /// Rescores fused hybrid candidates and drops those at or below
    /// `rerank_threshold`.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn reranker_name(&self) -> Option<&str> { self.reranker.as_deref().map(|r| r.name()) }

    pub fn config(&self) -> &RetrievalConfig { &self.config }

    /// Per-list depth for hybrid queries.
    pub fn oversampled(&self, k: usize) -> usize {
        let wanted = k.saturating_mul(self.config.oversample_factor).max(k);
        wanted.min(self.config.max_candidates.max(k))
    }

    /// Parses `strategy` before anything else touches the index.
    pub async fn retrieve_str(&self, query: &str, strategy: &str, k: usize, filter: &FileFilter) -> Result<Vec<RetrievalCandidate>, QueryError> {
        let strategy: Strategy = strategy.parse()?;
        self.retrieve(query, strategy, k, filter).await
    }

    pub async fn retrieve(&self, query: &str, strategy: Strategy, k: usize, filter: &FileFilter) -> Result<Vec<RetrievalCandidate>, QueryError> {
        self.validate(query, k)?;
        tracing::debug!(%strategy, k, filtered = !filter.is_unrestricted(), "retrieve");
        match strategy {
            Strategy::Dense => {
                let vector = self.embed_query(query).await?;
                let hits = self.index.query_dense(&vector, k, filter).await?;
                Ok(fusion::single(&hits, self.config.rrf_k, k))
            }
            Strategy::Sparse => {
                let terms = self.encoder.encode(query);
                let hits = self.index.query_sparse(&terms, k, filter).await?;
                Ok(fusion::single(&hits, self.config.rrf_k, k))
            }
            Strategy::Hybrid => {
                let vector = self.embed_query(query).await?;
                let terms = self.encoder.encode(query);
                let depth = self.oversampled(k);
                // both lists come from the same view of the index
                let snapshot = self.index.snapshot().await;
                let (dense, sparse) = tokio::try_join!(
                    snapshot.query_dense(&vector, depth, filter),
                    snapshot.query_sparse(&terms, depth, filter),
                )?;
                drop(snapshot);
                tracing::debug!(dense = dense.len(), sparse = sparse.len(), depth, "fusing");
                let params = FusionParams::from(&self.config);
                match &self.reranker {
                    None => Ok(fusion::fuse(&dense, &sparse, &params, k)),
                    Some(reranker) => {
                        let fused = fusion::fuse(&dense, &sparse, &params, depth);
                        Ok(self.rerank(reranker.as_ref(), query, fused, k).await)
                    }
                }
            }
        }
    }

    /// A failing reranker leaves the fused order in place.
    async fn rerank(&self, reranker: &dyn Reranker, query: &str, mut fused: Vec<RetrievalCandidate>, k: usize) -> Vec<RetrievalCandidate> {
        if fused.is_empty() { return fused; }
        let texts: Vec<String> = fused.iter().map(|c| c.chunk.text.clone()).collect();
        let scores = match reranker.score(query, &texts).await {
            Ok(scores) if scores.len() == fused.len() => scores,
            Ok(scores) => {
                tracing::warn!(reranker = reranker.name(), expected = fused.len(), got = scores.len(), "reranker returned wrong number of scores");
                fused.truncate(k);
                return fused;
            }
            Err(e) => {
                tracing::warn!(reranker = reranker.name(), "reranking failed: {:#}", e);
                fused.truncate(k);
                return fused;
            }
        };
        let before = fused.len();
        for (c, s) in fused.iter_mut().zip(scores) { c.rerank_score = Some(s); }
        fused.retain(|c| c.rerank_score.is_some_and(|s| s > self.config.rerank_threshold));
        // stable, so equal scores keep their fused order
        fused.sort_by(|a, b| b.rerank_score.unwrap_or(0.0).total_cmp(&a.rerank_score.unwrap_or(0.0)));
        fused.truncate(k);
        tracing::debug!(before, kept = fused.len(), threshold = self.config.rerank_threshold, "reranked");
        fused
    }

    fn validate(&self, query: &str, k: usize) -> Result<(), QueryError> {
        if k == 0 || k > self.config.max_k { return Err(QueryError::InvalidK { k, max: self.config.max_k }); }
        if query.trim().is_empty() { return Err(QueryError::InvalidQuestion("question is empty".into())); }
        let len = query.chars().count();
        if len > self.config.max_query_chars {
            return Err(QueryError::InvalidQuestion(format!("question has {} characters, limit is {}", len, self.config.max_query_chars)));
        }
        Ok(())
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, QueryError> {
        let embedder = self.embedder.clone();
        let text = vec![query.to_string()];
        let mut vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&text))
            .await
            .map_err(|e| QueryError::Embedding(e.to_string()))?
            .map_err(|e| QueryError::Embedding(format!("{:#}", e)))?;
        vectors.pop().ok_or_else(|| QueryError::Embedding("embedder returned no vector".into()))
    }
}
