//! End-to-end behavior of the hybrid retriever against in-memory backends
//!
//! The dense path runs over an in-memory cosine searcher fed by the
//! deterministic hash embedder; the sparse path is the real BM25 registry.
//! No database, models, or network involved.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use parley_retrieval::{
    Bm25Registry, DenseSearcher, HashEmbedder, HybridRetriever, RetrievalError, RetrieverConfig,
    SearchScope, TextEmbedder,
};
use parley_store::{DenseHit, IndexedChunk};

const DIM: usize = 512;

/// In-memory cosine-similarity dense backend
#[derive(Default)]
struct MemoryDense {
    rows: RwLock<HashMap<String, Vec<(Uuid, Uuid, String, Vec<f32>)>>>,
}

impl MemoryDense {
    async fn insert(&self, owner: &str, chunk_id: Uuid, document_id: Uuid, content: &str) {
        let embedder = HashEmbedder::new(DIM);
        let embedding = embedder
            .embed(&[content.to_string()])
            .await
            .unwrap()
            .remove(0);
        self.rows.write().entry(owner.to_string()).or_default().push((
            chunk_id,
            document_id,
            content.to_string(),
            embedding,
        ));
    }
}

#[async_trait]
impl DenseSearcher for MemoryDense {
    async fn search(
        &self,
        owner_id: &str,
        query: &[f32],
        threshold: f32,
        limit: i64,
        allow: Option<&Vec<Uuid>>,
    ) -> Result<Vec<DenseHit>, RetrievalError> {
        let rows = self.rows.read();
        let Some(owned) = rows.get(owner_id) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<DenseHit> = owned
            .iter()
            .filter(|(_, document_id, _, _)| {
                allow.map_or(true, |ids| ids.contains(document_id))
            })
            .map(|(chunk_id, document_id, content, embedding)| {
                let score: f32 = embedding.iter().zip(query).map(|(a, b)| a * b).sum();
                DenseHit {
                    chunk_id: *chunk_id,
                    document_id: *document_id,
                    content: content.clone(),
                    score,
                    is_contextualized: false,
                }
            })
            .filter(|hit| hit.score > threshold)
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        hits.truncate(limit as usize);
        Ok(hits)
    }
}

/// Dense backend that always fails, for degraded-mode tests
struct FailingDense;

#[async_trait]
impl DenseSearcher for FailingDense {
    async fn search(
        &self,
        _owner_id: &str,
        _query: &[f32],
        _threshold: f32,
        _limit: i64,
        _allow: Option<&Vec<Uuid>>,
    ) -> Result<Vec<DenseHit>, RetrievalError> {
        Err(RetrievalError::Store("connection refused".to_string()))
    }
}

struct Fixture {
    dense: Arc<MemoryDense>,
    registry: Arc<Bm25Registry>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dense: Arc::new(MemoryDense::default()),
            registry: Arc::new(Bm25Registry::new()),
        }
    }

    async fn seed(&self, owner: &str, document_id: Uuid, chunks: &[&str]) {
        for content in chunks {
            let chunk_id = Uuid::new_v4();
            self.dense.insert(owner, chunk_id, document_id, content).await;
        }

        // Rebuild the sparse snapshot from everything seeded so far, the same
        // O(N) owner scan a real ingest triggers.
        let all: Vec<IndexedChunk> = {
            let rows = self.dense.rows.read();
            rows.get(owner)
                .map(|owned| {
                    owned
                        .iter()
                        .enumerate()
                        .map(|(i, (chunk_id, document_id, content, _))| IndexedChunk {
                            chunk_id: *chunk_id,
                            document_id: *document_id,
                            content: content.clone(),
                            chunk_index: i as i32,
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        self.registry.rebuild(owner, all);
    }

    fn retriever(&self, hybrid: bool) -> HybridRetriever {
        let config = RetrieverConfig {
            hybrid_enabled: hybrid,
            similarity_threshold: 0.0,
            ..RetrieverConfig::default()
        };
        HybridRetriever::new(
            self.dense.clone(),
            self.registry.clone(),
            Arc::new(HashEmbedder::new(DIM)),
            None,
            config,
        )
    }
}

#[tokio::test]
async fn hybrid_returns_both_semantic_and_lexical_matches() {
    let fixture = Fixture::new();
    let doc = Uuid::new_v4();
    fixture
        .seed(
            "u1",
            doc,
            &[
                "the decline of the metropolis began with the harbor silting up",
                "Lucentia minted its own coinage for three centuries",
                "agricultural yields in the river valley",
            ],
        )
        .await;

    let retriever = fixture.retriever(true);
    let scope = SearchScope::owner("u1");

    // Shares vocabulary with chunk 0 and names the proper noun of chunk 1.
    let outcome = retriever
        .retrieve("decline of the metropolis Lucentia", &scope, Some(5), None)
        .await;

    assert!(!outcome.degraded);
    let contents: Vec<&str> = outcome.results.iter().map(|r| r.content.as_str()).collect();
    assert!(contents.iter().any(|c| c.contains("metropolis")));
    assert!(contents.iter().any(|c| c.contains("Lucentia")));
}

#[tokio::test]
async fn sparse_path_finds_rare_proper_noun() {
    let fixture = Fixture::new();
    let doc = Uuid::new_v4();
    fixture
        .seed(
            "u1",
            doc,
            &[
                "Lucentia minted its own coinage",
                "other text about nothing in particular",
            ],
        )
        .await;

    let retriever = fixture.retriever(true);
    let outcome = retriever
        .retrieve("Lucentia", &SearchScope::owner("u1"), Some(5), None)
        .await;

    assert!(outcome
        .results
        .iter()
        .any(|r| r.content.contains("Lucentia")));
}

#[tokio::test]
async fn degraded_mode_serves_bm25_when_dense_fails() {
    let fixture = Fixture::new();
    let doc = Uuid::new_v4();
    fixture
        .seed("u1", doc, &["the aether engine was invented in 1442"])
        .await;

    let retriever = HybridRetriever::new(
        Arc::new(FailingDense),
        fixture.registry.clone(),
        Arc::new(HashEmbedder::new(DIM)),
        None,
        RetrieverConfig {
            hybrid_enabled: true,
            ..RetrieverConfig::default()
        },
    );

    let outcome = retriever
        .retrieve("aether engine", &SearchScope::owner("u1"), Some(5), None)
        .await;

    assert!(outcome.degraded);
    assert!(!outcome.results.is_empty());
    assert!(outcome.results[0].content.contains("aether engine"));
}

#[tokio::test]
async fn both_paths_failing_yields_empty_degraded_result() {
    let registry = Arc::new(Bm25Registry::new());
    let retriever = HybridRetriever::new(
        Arc::new(FailingDense),
        registry,
        Arc::new(HashEmbedder::new(DIM)),
        None,
        RetrieverConfig {
            hybrid_enabled: true,
            ..RetrieverConfig::default()
        },
    );

    let outcome = retriever
        .retrieve("anything", &SearchScope::owner("u1"), Some(5), None)
        .await;

    assert!(outcome.degraded);
    assert!(outcome.results.is_empty());
}

#[tokio::test]
async fn cross_owner_isolation() {
    let fixture = Fixture::new();
    let doc = Uuid::new_v4();
    let secret = "the launch code is kept in the red cabinet";
    fixture.seed("u1", doc, &[secret]).await;

    let retriever = fixture.retriever(true);
    let outcome = retriever
        .retrieve(secret, &SearchScope::owner("u2"), Some(5), None)
        .await;

    assert!(outcome.results.is_empty());
    assert!(!outcome.degraded);
}

#[tokio::test]
async fn agent_scope_restricts_and_is_monotone() {
    let fixture = Fixture::new();
    let doc_linked = Uuid::new_v4();
    let doc_other = Uuid::new_v4();
    fixture
        .seed("u1", doc_linked, &["notes about thermodynamics"])
        .await;
    fixture
        .seed("u1", doc_other, &["notes about medieval trade routes"])
        .await;

    let retriever = fixture.retriever(true);

    let unscoped = retriever
        .retrieve(
            "notes about medieval trade routes",
            &SearchScope::owner("u1"),
            Some(5),
            None,
        )
        .await;
    assert!(unscoped
        .results
        .iter()
        .any(|r| r.document_id == doc_other));

    let scoped = retriever
        .retrieve(
            "notes about medieval trade routes",
            &SearchScope {
                owner_id: "u1".to_string(),
                allowed_documents: Some(vec![doc_linked]),
            },
            Some(5),
            None,
        )
        .await;

    // Scoped results are a subset of unscoped results.
    assert!(scoped.results.iter().all(|r| r.document_id == doc_linked));
    assert!(scoped.results.iter().all(|scoped_hit| {
        unscoped
            .results
            .iter()
            .any(|u| u.chunk_id == scoped_hit.chunk_id)
    }));
}

#[tokio::test]
async fn agent_with_zero_links_gets_nothing() {
    let fixture = Fixture::new();
    let doc = Uuid::new_v4();
    fixture.seed("u1", doc, &["anything at all"]).await;

    let retriever = fixture.retriever(true);
    let outcome = retriever
        .retrieve(
            "anything at all",
            &SearchScope {
                owner_id: "u1".to_string(),
                allowed_documents: Some(vec![]),
            },
            Some(5),
            None,
        )
        .await;

    assert!(outcome.results.is_empty());
    assert!(!outcome.degraded);
}

#[tokio::test]
async fn empty_query_short_circuits() {
    let fixture = Fixture::new();
    let retriever = fixture.retriever(true);

    let outcome = retriever
        .retrieve("   ", &SearchScope::owner("u1"), Some(5), None)
        .await;

    assert!(outcome.results.is_empty());
    assert!(!outcome.degraded);
}

#[tokio::test]
async fn vector_only_when_hybrid_disabled() {
    let fixture = Fixture::new();
    let doc = Uuid::new_v4();
    fixture
        .seed("u1", doc, &["the decline of the metropolis"])
        .await;

    let retriever = fixture.retriever(false);
    let outcome = retriever
        .retrieve(
            "decline of the metropolis",
            &SearchScope::owner("u1"),
            Some(5),
            None,
        )
        .await;

    assert!(!outcome.degraded);
    assert!(!outcome.results.is_empty());
}
