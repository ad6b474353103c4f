//! Sparse keyword search
//!
//! Per-owner BM25 over an in-memory inverted index. Builders produce an
//! immutable snapshot off the query path; publishing swaps an `Arc` under a
//! short write lock, so readers never observe a partially built index and
//! pay no lock for the duration of a query.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use parley_store::IndexedChunk;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// A sparse-search hit
#[derive(Debug, Clone)]
pub struct SparseHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub score: f32,
}

/// Entry in a snapshot's corpus
#[derive(Debug, Clone)]
struct CorpusEntry {
    chunk_id: Uuid,
    document_id: Uuid,
    content: String,
}

/// Immutable point-in-time view of one owner's corpus
pub struct OwnerSnapshot {
    entries: Vec<CorpusEntry>,
    /// term -> [(corpus position, term frequency)]
    postings: HashMap<String, Vec<(u32, u32)>>,
    doc_lengths: Vec<u32>,
    avg_doc_length: f32,
}

impl OwnerSnapshot {
    /// Build a snapshot from an owner's chunks; O(total tokens)
    pub fn build(chunks: Vec<IndexedChunk>) -> Self {
        let mut entries = Vec::with_capacity(chunks.len());
        let mut postings: HashMap<String, Vec<(u32, u32)>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(chunks.len());

        for (position, chunk) in chunks.into_iter().enumerate() {
            let tokens = tokenize(&chunk.content);
            doc_lengths.push(tokens.len() as u32);

            let mut frequencies: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *frequencies.entry(token).or_insert(0) += 1;
            }
            for (term, tf) in frequencies {
                postings.entry(term).or_default().push((position as u32, tf));
            }

            entries.push(CorpusEntry {
                chunk_id: chunk.chunk_id,
                document_id: chunk.document_id,
                content: chunk.content,
            });
        }

        let avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            doc_lengths.iter().sum::<u32>() as f32 / doc_lengths.len() as f32
        };

        Self {
            entries,
            postings,
            doc_lengths,
            avg_doc_length,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Score the whole corpus against a query and return the top `limit`
    ///
    /// `allow` restricts results to chunks of the given documents.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        allow: Option<&HashSet<Uuid>>,
    ) -> Vec<SparseHit> {
        let terms = tokenize(query);
        if terms.is_empty() || self.entries.is_empty() {
            return Vec::new();
        }

        let n = self.entries.len() as f32;
        let mut scores: HashMap<u32, f32> = HashMap::new();

        for term in &terms {
            let Some(posting) = self.postings.get(term) else {
                continue;
            };
            let df = posting.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for &(position, tf) in posting {
                let tf = tf as f32;
                let dl = self.doc_lengths[position as usize] as f32;
                let norm = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / self.avg_doc_length);
                let contribution = idf * tf * (BM25_K1 + 1.0) / norm;
                *scores.entry(position).or_insert(0.0) += contribution;
            }
        }

        let mut ranked: Vec<(u32, f32)> = scores
            .into_iter()
            .filter(|(position, _)| {
                allow.map_or(true, |set| {
                    set.contains(&self.entries[*position as usize].document_id)
                })
            })
            .collect();

        // Position is the secondary key so equal scores order deterministically.
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(limit);

        ranked
            .into_iter()
            .map(|(position, score)| {
                let entry = &self.entries[position as usize];
                SparseHit {
                    chunk_id: entry.chunk_id,
                    document_id: entry.document_id,
                    content: entry.content.clone(),
                    score,
                }
            })
            .collect()
    }
}

/// Process-wide registry of per-owner BM25 snapshots
#[derive(Default)]
pub struct Bm25Registry {
    shards: RwLock<HashMap<String, Arc<OwnerSnapshot>>>,
}

impl Bm25Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and publish a fresh snapshot for an owner
    ///
    /// Concurrent rebuilds for the same owner both read the store and race on
    /// the publish; the later publish wins, which is the latest state either
    /// way. Readers keep whichever snapshot they already cloned.
    pub fn rebuild(&self, owner_id: &str, chunks: Vec<IndexedChunk>) {
        let snapshot = Arc::new(OwnerSnapshot::build(chunks));
        let size = snapshot.len();
        self.shards
            .write()
            .insert(owner_id.to_string(), snapshot);
        tracing::debug!(owner = %owner_id, chunks = size, "Published BM25 snapshot");
    }

    /// Current snapshot for an owner, if any
    pub fn snapshot(&self, owner_id: &str) -> Option<Arc<OwnerSnapshot>> {
        self.shards.read().get(owner_id).cloned()
    }

    /// Drop an owner's snapshot entirely
    pub fn remove(&self, owner_id: &str) {
        self.shards.write().remove(owner_id);
    }

    /// Number of owners with a resident snapshot
    pub fn owner_count(&self) -> usize {
        self.shards.read().len()
    }
}

/// Tokenize for indexing and querying: lowercase, split on non-alphanumerics.
///
/// The same function runs on both sides, which is the only property BM25
/// needs from it.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(document_id: Uuid, index: i32, content: &str) -> IndexedChunk {
        IndexedChunk {
            chunk_id: Uuid::new_v4(),
            document_id,
            content: content.to_string(),
            chunk_index: index,
        }
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("The Aether-Engine, was invented!"),
            vec!["the", "aether", "engine", "was", "invented"]
        );
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_search_ranks_matching_chunk_first() {
        let doc = Uuid::new_v4();
        let snapshot = OwnerSnapshot::build(vec![
            chunk(doc, 0, "Rust is a systems programming language"),
            chunk(doc, 1, "Basil grows best in warm weather"),
        ]);

        let hits = snapshot.search("systems programming", 5, None);
        assert!(!hits.is_empty());
        assert!(hits[0].content.contains("Rust"));
    }

    #[test]
    fn test_rare_term_scores_higher_than_common() {
        let doc = Uuid::new_v4();
        let snapshot = OwnerSnapshot::build(vec![
            chunk(doc, 0, "the city endured the long winter"),
            chunk(doc, 1, "the city of Lucentia endured the long winter"),
            chunk(doc, 2, "the harbor froze in the long winter"),
        ]);

        let hits = snapshot.search("Lucentia", 3, None);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("Lucentia"));
    }

    #[test]
    fn test_allow_list_filters_documents() {
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let snapshot = OwnerSnapshot::build(vec![
            chunk(doc_a, 0, "gold loan interest rates"),
            chunk(doc_b, 0, "gold loan repayment schedule"),
        ]);

        let allow: HashSet<Uuid> = [doc_a].into_iter().collect();
        let hits = snapshot.search("gold loan", 5, Some(&allow));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, doc_a);
    }

    #[test]
    fn test_empty_query_and_empty_corpus() {
        let snapshot = OwnerSnapshot::build(vec![]);
        assert!(snapshot.search("anything", 5, None).is_empty());

        let doc = Uuid::new_v4();
        let snapshot = OwnerSnapshot::build(vec![chunk(doc, 0, "content")]);
        assert!(snapshot.search("", 5, None).is_empty());
        assert!(snapshot.search("???", 5, None).is_empty());
    }

    #[test]
    fn test_search_is_deterministic() {
        let doc = Uuid::new_v4();
        let chunks: Vec<IndexedChunk> = (0..20)
            .map(|i| chunk(doc, i, "identical text in every chunk"))
            .collect();
        let snapshot = OwnerSnapshot::build(chunks);

        let first: Vec<Uuid> = snapshot
            .search("identical text", 10, None)
            .into_iter()
            .map(|h| h.chunk_id)
            .collect();
        let second: Vec<Uuid> = snapshot
            .search("identical text", 10, None)
            .into_iter()
            .map(|h| h.chunk_id)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_registry_snapshot_swap() {
        let registry = Bm25Registry::new();
        assert!(registry.snapshot("u1").is_none());

        let doc = Uuid::new_v4();
        registry.rebuild("u1", vec![chunk(doc, 0, "first version")]);
        let old = registry.snapshot("u1").unwrap();
        assert_eq!(old.len(), 1);

        registry.rebuild(
            "u1",
            vec![
                chunk(doc, 0, "second version"),
                chunk(doc, 1, "with more chunks"),
            ],
        );

        // The reader that took the old snapshot still sees it unchanged.
        assert_eq!(old.len(), 1);
        assert_eq!(registry.snapshot("u1").unwrap().len(), 2);
    }

    #[test]
    fn test_registry_owner_isolation() {
        let registry = Bm25Registry::new();
        registry.rebuild("u1", vec![chunk(Uuid::new_v4(), 0, "alpha beta")]);

        assert!(registry.snapshot("u2").is_none());
        let hits = registry.snapshot("u1").unwrap().search("alpha", 5, None);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_registry_remove() {
        let registry = Bm25Registry::new();
        registry.rebuild("u1", vec![chunk(Uuid::new_v4(), 0, "text")]);
        registry.remove("u1");
        assert!(registry.snapshot("u1").is_none());
    }
}
