//! Document metadata cache
//!
//! Per-result title lookups otherwise dominate end-to-end latency when many
//! chunks come from few documents, so the context service consults this TTL
//! map before touching the store. Expiry is lazy: entries are checked on read
//! and overwritten on insert.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use uuid::Uuid;

use parley_core::DocumentType;

/// Cached document metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMeta {
    pub title: String,
    pub doc_type: DocumentType,
}

/// TTL-bounded map from document id to metadata
pub struct MetadataCache {
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, (DocumentMeta, Instant)>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a document; expired entries count as misses
    pub fn get(&self, document_id: Uuid) -> Option<DocumentMeta> {
        let entries = self.entries.read();
        match entries.get(&document_id) {
            Some((meta, inserted_at)) if inserted_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(meta.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, document_id: Uuid, meta: DocumentMeta) {
        self.entries
            .write()
            .insert(document_id, (meta, Instant::now()));
    }

    /// Drop one document's entry; called on delete
    pub fn invalidate(&self, document_id: Uuid) {
        self.entries.write().remove(&document_id);
    }

    /// Drop expired entries; safe to call from any maintenance path
    pub fn prune(&self) {
        let mut entries = self.entries.write();
        entries.retain(|_, (_, inserted_at)| inserted_at.elapsed() < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: &str) -> DocumentMeta {
        DocumentMeta {
            title: title.to_string(),
            doc_type: DocumentType::Text,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();

        assert!(cache.get(id).is_none());
        cache.insert(id, meta("notes.txt"));
        assert_eq!(cache.get(id).unwrap().title, "notes.txt");
    }

    #[test]
    fn test_expiry_is_lazy() {
        let cache = MetadataCache::new(Duration::from_millis(10));
        let id = Uuid::new_v4();
        cache.insert(id, meta("old"));

        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(id).is_none());

        // The stale entry is still resident until pruned or overwritten.
        assert_eq!(cache.len(), 1);
        cache.prune();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        cache.insert(id, meta("doomed"));
        cache.invalidate(id);
        assert!(cache.get(id).is_none());
    }

    #[test]
    fn test_hit_rate() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        cache.insert(id, meta("x"));

        cache.get(id);
        cache.get(Uuid::new_v4());
        assert!((cache.hit_rate() - 0.5).abs() < 0.01);
    }
}
