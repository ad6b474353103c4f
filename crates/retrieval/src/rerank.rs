//! Cross-encoder reranking
//!
//! Scores (query, candidate) pairs jointly; more accurate than embedding
//! cosine but too slow for first-stage retrieval, so it only sees the fused
//! shortlist. The ONNX session loads at service start and inference runs on
//! the blocking pool. Without the `onnx` feature a token-overlap scorer
//! stands in, which keeps the ordering contract testable everywhere.

use parking_lot::Mutex;

#[cfg(feature = "onnx")]
use ndarray::Array2;
#[cfg(feature = "onnx")]
use ort::{GraphOptimizationLevel, Session};
#[cfg(feature = "onnx")]
use tokenizers::Tokenizer;

use parley_config::RerankerConfig;

use crate::RetrievalError;

/// Pair scorer over a query and a candidate list
pub trait Reranker: Send + Sync {
    /// Score each candidate against the query; one score per candidate, in
    /// input order
    fn score_pairs(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>, RetrievalError>;
}

/// Usage counters for monitoring
#[derive(Debug, Clone, Default)]
pub struct RerankerStats {
    pub total_pairs: usize,
    pub total_calls: usize,
}

/// Cross-encoder reranker
pub struct CrossEncoderReranker {
    #[cfg(feature = "onnx")]
    session: Session,
    #[cfg(feature = "onnx")]
    tokenizer: Tokenizer,
    #[cfg(feature = "onnx")]
    max_seq_len: usize,
    stats: Mutex<RerankerStats>,
}

impl CrossEncoderReranker {
    /// Load the cross-encoder; called once at startup
    #[cfg(feature = "onnx")]
    pub fn load(config: &RerankerConfig) -> Result<Self, RetrievalError> {
        let session = Session::builder()
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?
            .commit_from_file(&config.model_path)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        Ok(Self {
            session,
            tokenizer,
            max_seq_len: config.max_seq_len,
            stats: Mutex::new(RerankerStats::default()),
        })
    }

    /// Construct the fallback scorer when ONNX is disabled
    #[cfg(not(feature = "onnx"))]
    pub fn load(_config: &RerankerConfig) -> Result<Self, RetrievalError> {
        Ok(Self {
            stats: Mutex::new(RerankerStats::default()),
        })
    }

    pub fn stats(&self) -> RerankerStats {
        self.stats.lock().clone()
    }

    #[cfg(feature = "onnx")]
    fn score_pair(&self, query: &str, candidate: &str) -> Result<f32, RetrievalError> {
        let encoding = self
            .tokenizer
            .encode((query, candidate), true)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let ids: Vec<i64> = encoding
            .get_ids()
            .iter()
            .take(self.max_seq_len)
            .map(|&id| id as i64)
            .collect();

        let mut padded_ids = vec![0i64; self.max_seq_len];
        let mut padded_mask = vec![0i64; self.max_seq_len];
        padded_ids[..ids.len()].copy_from_slice(&ids);
        for slot in padded_mask.iter_mut().take(ids.len()) {
            *slot = 1;
        }

        let input_ids = Array2::from_shape_vec((1, self.max_seq_len), padded_ids)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;
        let attention = Array2::from_shape_vec((1, self.max_seq_len), padded_mask)
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let outputs = self
            .session
            .run(
                ort::inputs![
                    "input_ids" => input_ids.view(),
                    "attention_mask" => attention.view(),
                ]
                .map_err(|e| RetrievalError::Reranker(e.to_string()))?,
            )
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let logits = outputs
            .get("logits")
            .ok_or_else(|| RetrievalError::Reranker("missing logits output".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| RetrievalError::Reranker(e.to_string()))?;

        let flat: Vec<f32> = logits.view().iter().copied().collect();
        Ok(relevance_from_logits(&flat))
    }

    #[cfg(not(feature = "onnx"))]
    fn score_pair(&self, query: &str, candidate: &str) -> Result<f32, RetrievalError> {
        Ok(lexical_overlap(query, candidate))
    }
}

impl Reranker for CrossEncoderReranker {
    fn score_pairs(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>, RetrievalError> {
        let scores = candidates
            .iter()
            .map(|candidate| self.score_pair(query, candidate))
            .collect::<Result<Vec<_>, _>>()?;

        let mut stats = self.stats.lock();
        stats.total_pairs += candidates.len();
        stats.total_calls += 1;

        Ok(scores)
    }
}

/// Relevance probability from classifier logits
#[cfg(feature = "onnx")]
fn relevance_from_logits(logits: &[f32]) -> f32 {
    if logits.len() >= 2 {
        let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exp_sum: f32 = logits.iter().map(|&x| (x - max).exp()).sum();
        (logits[1] - max).exp() / exp_sum
    } else if logits.len() == 1 {
        1.0 / (1.0 + (-logits[0]).exp())
    } else {
        0.0
    }
}

/// Jaccard overlap of lowercased token sets; the model-free stand-in
#[cfg(not(feature = "onnx"))]
fn lexical_overlap(query: &str, candidate: &str) -> f32 {
    use std::collections::HashSet;

    let query_lower = query.to_lowercase();
    let candidate_lower = candidate.to_lowercase();

    let query_words: HashSet<&str> = query_lower.split_whitespace().collect();
    let candidate_words: HashSet<&str> = candidate_lower.split_whitespace().collect();

    let overlap = query_words.intersection(&candidate_words).count();
    let union = query_words.union(&candidate_words).count();

    if union > 0 {
        overlap as f32 / union as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_lexical_overlap_ranks_matching_candidate() {
        let reranker = CrossEncoderReranker::load(&RerankerConfig::default()).unwrap();
        let scores = reranker
            .score_pairs(
                "who invented the aether engine",
                &[
                    "the aether engine was invented in 1442".to_string(),
                    "a recipe for sourdough bread".to_string(),
                ],
            )
            .unwrap();

        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_empty_candidate_list() {
        let reranker = CrossEncoderReranker::load(&RerankerConfig::default()).unwrap();
        let scores = reranker.score_pairs("query", &[]).unwrap();
        assert!(scores.is_empty());
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_stats_advance() {
        let reranker = CrossEncoderReranker::load(&RerankerConfig::default()).unwrap();
        reranker
            .score_pairs("q", &["a".to_string(), "b".to_string()])
            .unwrap();
        let stats = reranker.stats();
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.total_pairs, 2);
    }
}
