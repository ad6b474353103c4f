//! Hybrid retrieval engine
//!
//! Features:
//! - Dense vector search against the section store
//! - Sparse BM25 search over per-owner in-memory snapshots
//! - Reciprocal rank fusion of both paths
//! - Optional cross-encoder reranking of the fused shortlist
//! - The per-turn context contract used by agents between utterances

pub mod cache;
pub mod context;
pub mod embeddings;
pub mod rerank;
pub mod retriever;
pub mod sparse;
pub mod store_backends;

pub use cache::{DocumentMeta, MetadataCache};
pub use context::{AgentScope, ContextBlock, ContextService, ContextServiceConfig, DocumentDirectory};
pub use embeddings::{HashEmbedder, OpenAiEmbedder, TextEmbedder};
pub use rerank::{CrossEncoderReranker, Reranker};
pub use retriever::{
    DenseSearcher, HybridRetriever, RetrieverConfig, RetrievalOutcome, ScoredChunk, SearchScope,
};
pub use sparse::{Bm25Registry, OwnerSnapshot, SparseHit};

use thiserror::Error;

/// Retrieval errors
///
/// These stay internal to the retrieval path: a failed backend degrades the
/// result instead of surfacing, so only the ingest-time embedding calls and
/// programming errors ever convert into the core taxonomy.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Reranker error: {0}")]
    Reranker(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<parley_store::StoreError> for RetrievalError {
    fn from(err: parley_store::StoreError) -> Self {
        RetrievalError::Store(err.to_string())
    }
}

impl From<RetrievalError> for parley_core::Error {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Timeout(msg) => parley_core::Error::BackendTimeout(msg),
            other => parley_core::Error::Backend(other.to_string()),
        }
    }
}
