//! Optional post-fusion reranking.

use crate::{error::Result, retriever::RetrievedDocument};

/// Reorders fused results before they are returned.
///
/// When a reranker is attached, the retriever fetches `2 * k` fused
/// candidates and lets the reranker choose the final `top_k`.
pub trait Reranker: Send + Sync {
    fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedDocument>,
        top_k: usize,
    ) -> Result<Vec<RetrievedDocument>>;
}

/// Keeps fusion order and truncates to `top_k`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityReranker;

impl Reranker for IdentityReranker {
    fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<RetrievedDocument>,
        top_k: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        candidates.truncate(top_k);
        Ok(candidates)
    }
}
