//! Hybrid retrieval orchestration
//!
//! Runs the dense and sparse paths concurrently under a hard deadline, fuses
//! with reciprocal rank fusion, optionally reranks the shortlist, and
//! degrades instead of failing: whichever paths produced results are used,
//! and the caller learns via the `degraded` flag when a path gave up.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use uuid::Uuid;

use parley_config::{FeatureFlags, RetrievalConfig};
use parley_store::DenseHit;

use crate::embeddings::TextEmbedder;
use crate::rerank::Reranker;
use crate::sparse::Bm25Registry;
use crate::RetrievalError;

/// First-stage dense search backend
///
/// Implemented by the section store; mocked in tests so the orchestration is
/// testable without a database.
#[async_trait]
pub trait DenseSearcher: Send + Sync {
    async fn search(
        &self,
        owner_id: &str,
        query: &[f32],
        threshold: f32,
        limit: i64,
        allow: Option<&Vec<Uuid>>,
    ) -> Result<Vec<DenseHit>, RetrievalError>;
}

/// Owner plus optional agent allow-list
#[derive(Debug, Clone)]
pub struct SearchScope {
    pub owner_id: String,
    /// `None` means unrestricted within the owner. `Some(empty)` means the
    /// requesting agent has no documents and nothing can match.
    pub allowed_documents: Option<Vec<Uuid>>,
}

impl SearchScope {
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            allowed_documents: None,
        }
    }
}

/// Retriever configuration, resolved from settings and feature flags
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub rrf_k: f32,
    pub candidate_multiplier: usize,
    pub search_deadline: Duration,
    pub rerank_pool: usize,
    pub hybrid_enabled: bool,
    pub rerank_enabled: bool,
}

impl RetrieverConfig {
    pub fn from_settings(retrieval: &RetrievalConfig, features: &FeatureFlags) -> Self {
        Self {
            top_k: retrieval.top_k,
            similarity_threshold: retrieval.similarity_threshold,
            rrf_k: retrieval.rrf_k,
            candidate_multiplier: retrieval.candidate_multiplier.max(1),
            search_deadline: Duration::from_millis(retrieval.search_deadline_ms),
            rerank_pool: retrieval.rerank_pool,
            hybrid_enabled: features.hybrid_search,
            rerank_enabled: features.rerank,
        }
    }
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self::from_settings(&RetrievalConfig::default(), &FeatureFlags::default())
    }
}

/// One retrieved chunk with its fusion (and optional rerank) score
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
}

/// Result of one retrieval
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub results: Vec<ScoredChunk>,
    /// True when at least one search path failed or timed out
    pub degraded: bool,
}

/// A candidate entering fusion; one ranked list per search path
#[derive(Debug, Clone)]
pub struct FusionCandidate {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
}

/// Reciprocal rank fusion with constant `k`
///
/// `score(c) = Σ_lists 1 / (k + rank_in_list)`, ranks 1-based; a candidate
/// absent from a list contributes nothing there. Ties order by first
/// appearance across the input lists, which makes the fusion deterministic.
pub fn reciprocal_rank_fusion(
    lists: &[Vec<FusionCandidate>],
    k: f32,
) -> Vec<(FusionCandidate, f32)> {
    struct Slot {
        candidate: FusionCandidate,
        score: f32,
        first_seen: usize,
    }

    let mut slots: HashMap<Uuid, Slot> = HashMap::new();
    let mut arrival = 0usize;

    for list in lists {
        for (position, candidate) in list.iter().enumerate() {
            let contribution = 1.0 / (k + (position + 1) as f32);
            match slots.get_mut(&candidate.chunk_id) {
                Some(slot) => slot.score += contribution,
                None => {
                    slots.insert(
                        candidate.chunk_id,
                        Slot {
                            candidate: candidate.clone(),
                            score: contribution,
                            first_seen: arrival,
                        },
                    );
                    arrival += 1;
                }
            }
        }
    }

    let mut fused: Vec<Slot> = slots.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.first_seen.cmp(&b.first_seen))
    });

    fused
        .into_iter()
        .map(|slot| (slot.candidate, slot.score))
        .collect()
}

/// Orchestrates dense + sparse search, fusion, and reranking
pub struct HybridRetriever {
    dense: Arc<dyn DenseSearcher>,
    sparse: Arc<Bm25Registry>,
    embedder: Arc<dyn TextEmbedder>,
    reranker: Option<Arc<dyn Reranker>>,
    config: RetrieverConfig,
}

impl HybridRetriever {
    pub fn new(
        dense: Arc<dyn DenseSearcher>,
        sparse: Arc<Bm25Registry>,
        embedder: Arc<dyn TextEmbedder>,
        reranker: Option<Arc<dyn Reranker>>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            dense,
            sparse,
            embedder,
            reranker,
            config,
        }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Run one retrieval
    ///
    /// `top_k` and `threshold` default from configuration when not given.
    pub async fn retrieve(
        &self,
        query: &str,
        scope: &SearchScope,
        top_k: Option<usize>,
        threshold: Option<f32>,
    ) -> RetrievalOutcome {
        let query = query.trim();
        if query.is_empty() {
            return RetrievalOutcome::default();
        }
        if matches!(&scope.allowed_documents, Some(allowed) if allowed.is_empty()) {
            return RetrievalOutcome::default();
        }

        let top_k = top_k.unwrap_or(self.config.top_k).max(1);
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);
        let candidates = top_k * self.config.candidate_multiplier;

        let (dense_list, sparse_list, degraded) =
            self.run_search_paths(query, scope, threshold, candidates).await;

        let mut lists = Vec::with_capacity(2);
        lists.push(dense_list);
        if let Some(sparse) = sparse_list {
            lists.push(sparse);
        }

        let fused = reciprocal_rank_fusion(&lists, self.config.rrf_k);
        let mut results: Vec<ScoredChunk> = fused
            .into_iter()
            .map(|(candidate, score)| ScoredChunk {
                chunk_id: candidate.chunk_id,
                document_id: candidate.document_id,
                content: candidate.content,
                fused_score: score,
                rerank_score: None,
            })
            .collect();

        if self.config.rerank_enabled && !results.is_empty() {
            if let Some(reranker) = &self.reranker {
                let pool = results
                    .len()
                    .min(3 * top_k)
                    .min(self.config.rerank_pool);
                self.rerank_shortlist(query, &mut results, pool, reranker.clone())
                    .await;
            }
        }

        results.truncate(top_k);
        RetrievalOutcome { results, degraded }
    }

    /// Launch both search paths concurrently and wait under the deadline
    async fn run_search_paths(
        &self,
        query: &str,
        scope: &SearchScope,
        threshold: f32,
        candidates: usize,
    ) -> (Vec<FusionCandidate>, Option<Vec<FusionCandidate>>, bool) {
        let deadline = self.config.search_deadline;
        let mut degraded = false;

        let dense_fut = self.dense_path(query, scope, threshold, candidates, deadline);
        let sparse_fut = self.sparse_path(query, scope, candidates, deadline);
        let (dense_outcome, sparse_outcome) = tokio::join!(dense_fut, sparse_fut);

        let dense_list = match dense_outcome {
            Ok(list) => list,
            Err(err) => {
                tracing::warn!(owner = %scope.owner_id, error = %err, "dense path unavailable");
                degraded = true;
                Vec::new()
            }
        };

        let sparse_list = match sparse_outcome {
            None => None,
            Some(Ok(list)) => Some(list),
            Some(Err(err)) => {
                tracing::warn!(owner = %scope.owner_id, error = %err, "sparse path unavailable");
                degraded = true;
                Some(Vec::new())
            }
        };

        (dense_list, sparse_list, degraded)
    }

    async fn dense_path(
        &self,
        query: &str,
        scope: &SearchScope,
        threshold: f32,
        candidates: usize,
        deadline: Duration,
    ) -> Result<Vec<FusionCandidate>, RetrievalError> {
        let query_batch = [query.to_string()];
        let embedded = self.embedder.embed(&query_batch).await?;
        let query_vector = embedded
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Embedding("empty embedding batch".to_string()))?;

        let search = self.dense.search(
            &scope.owner_id,
            &query_vector,
            threshold,
            candidates as i64,
            scope.allowed_documents.as_ref(),
        );

        let hits = timeout(deadline, search)
            .await
            .map_err(|_| RetrievalError::Timeout("dense search deadline".to_string()))??;

        Ok(hits
            .into_iter()
            .map(|hit: DenseHit| FusionCandidate {
                chunk_id: hit.chunk_id,
                document_id: hit.document_id,
                content: hit.content,
            })
            .collect())
    }

    /// Sparse search on the owner's current snapshot; `None` when the sparse
    /// path is disabled by configuration
    async fn sparse_path(
        &self,
        query: &str,
        scope: &SearchScope,
        candidates: usize,
        deadline: Duration,
    ) -> Option<Result<Vec<FusionCandidate>, RetrievalError>> {
        if !self.config.hybrid_enabled {
            return None;
        }

        let Some(snapshot) = self.sparse.snapshot(&scope.owner_id) else {
            // Owner has no indexed documents; empty is the correct answer.
            return Some(Ok(Vec::new()));
        };

        let query = query.to_string();
        let allow: Option<HashSet<Uuid>> = scope
            .allowed_documents
            .as_ref()
            .map(|ids| ids.iter().copied().collect());

        let scoring = tokio::task::spawn_blocking(move || {
            snapshot.search(&query, candidates, allow.as_ref())
        });

        let result = match timeout(deadline, scoring).await {
            Err(_) => Err(RetrievalError::Timeout("sparse search deadline".to_string())),
            Ok(Err(join_err)) => Err(RetrievalError::Store(join_err.to_string())),
            Ok(Ok(hits)) => Ok(hits
                .into_iter()
                .map(|hit| FusionCandidate {
                    chunk_id: hit.chunk_id,
                    document_id: hit.document_id,
                    content: hit.content,
                })
                .collect()),
        };

        Some(result)
    }

    /// Rescore the head of the fused list and reorder it
    ///
    /// Rerank failure keeps the fused order; ties keep their fused order.
    async fn rerank_shortlist(
        &self,
        query: &str,
        results: &mut Vec<ScoredChunk>,
        pool: usize,
        reranker: Arc<dyn Reranker>,
    ) {
        let query = query.to_string();
        let texts: Vec<String> = results[..pool].iter().map(|r| r.content.clone()).collect();

        let scored = tokio::task::spawn_blocking(move || reranker.score_pairs(&query, &texts)).await;

        let scores = match scored {
            Ok(Ok(scores)) if scores.len() == pool => scores,
            Ok(Ok(scores)) => {
                tracing::warn!(
                    expected = pool,
                    got = scores.len(),
                    "reranker returned wrong score count; keeping fused order"
                );
                return;
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "rerank failed; keeping fused order");
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "rerank task failed; keeping fused order");
                return;
            }
        };

        let mut head: Vec<(usize, ScoredChunk)> =
            results.drain(..pool).enumerate().collect();
        for (position, chunk) in head.iter_mut() {
            chunk.rerank_score = Some(scores[*position]);
        }
        head.sort_by(|a, b| {
            let sa = a.1.rerank_score.unwrap_or(0.0);
            let sb = b.1.rerank_score.unwrap_or(0.0);
            sb.partial_cmp(&sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let tail: Vec<ScoredChunk> = results.drain(..).collect();
        *results = head.into_iter().map(|(_, chunk)| chunk).collect();
        results.extend(tail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(chunk_id: Uuid, content: &str) -> FusionCandidate {
        FusionCandidate {
            chunk_id,
            document_id: Uuid::new_v4(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_rrf_candidate_in_both_lists_wins() {
        let shared = Uuid::new_v4();
        let only_dense = Uuid::new_v4();
        let only_sparse = Uuid::new_v4();

        let dense = vec![candidate(only_dense, "dense"), candidate(shared, "shared")];
        let sparse = vec![candidate(shared, "shared"), candidate(only_sparse, "sparse")];

        let fused = reciprocal_rank_fusion(&[dense, sparse], 60.0);

        // shared: 1/62 + 1/61; only_dense: 1/61; only_sparse: 1/62
        assert_eq!(fused[0].0.chunk_id, shared);
        assert_eq!(fused[1].0.chunk_id, only_dense);
        assert_eq!(fused[2].0.chunk_id, only_sparse);
        assert!(fused[0].1 > fused[1].1);
    }

    #[test]
    fn test_rrf_is_deterministic() {
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let list_a: Vec<FusionCandidate> =
            ids.iter().map(|id| candidate(*id, "a")).collect();
        let list_b: Vec<FusionCandidate> =
            ids.iter().rev().map(|id| candidate(*id, "b")).collect();

        let first: Vec<Uuid> = reciprocal_rank_fusion(&[list_a.clone(), list_b.clone()], 60.0)
            .into_iter()
            .map(|(c, _)| c.chunk_id)
            .collect();
        let second: Vec<Uuid> = reciprocal_rank_fusion(&[list_a, list_b], 60.0)
            .into_iter()
            .map(|(c, _)| c.chunk_id)
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_rrf_ties_preserve_first_seen_order() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        // Both appear at rank 1 of their own list: identical scores.
        let fused = reciprocal_rank_fusion(
            &[vec![candidate(first, "x")], vec![candidate(second, "y")]],
            60.0,
        );

        assert_eq!(fused[0].0.chunk_id, first);
        assert_eq!(fused[1].0.chunk_id, second);
    }

    #[test]
    fn test_rrf_empty_lists() {
        assert!(reciprocal_rank_fusion(&[], 60.0).is_empty());
        assert!(reciprocal_rank_fusion(&[vec![], vec![]], 60.0).is_empty());
    }
}
