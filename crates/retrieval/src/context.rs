//! Per-turn context service
//!
//! The front door an agent calls between a user utterance and the LLM
//! response: resolve the agent's document scope, retrieve, format a bounded
//! context block, and report whether anything was found. Idempotent and
//! side-effect-free apart from metric counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

use parley_config::RetrievalConfig;

use crate::cache::{DocumentMeta, MetadataCache};
use crate::retriever::{HybridRetriever, RetrievalOutcome, ScoredChunk, SearchScope};
use crate::RetrievalError;

/// Title/type lookups for formatting; implemented by the document store
#[async_trait]
pub trait DocumentDirectory: Send + Sync {
    async fn document_meta(&self, id: Uuid) -> Result<Option<DocumentMeta>, RetrievalError>;
}

/// Agent allow-list resolution; implemented by the agent store
#[async_trait]
pub trait AgentScope: Send + Sync {
    /// Documents linked to an agent; empty when the agent has no links or
    /// does not exist
    async fn allowed_documents(&self, agent_id: Uuid) -> Result<Vec<Uuid>, RetrievalError>;
}

/// The per-turn answer handed back to the agent
#[derive(Debug, Clone, Default)]
pub struct ContextBlock {
    pub context: String,
    pub has_context: bool,
}

/// Context service configuration
#[derive(Debug, Clone)]
pub struct ContextServiceConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub char_budget: usize,
    pub soft_budget: Duration,
}

impl ContextServiceConfig {
    pub fn from_settings(retrieval: &RetrievalConfig) -> Self {
        Self {
            top_k: retrieval.top_k,
            similarity_threshold: retrieval.similarity_threshold,
            char_budget: retrieval.context_char_budget,
            soft_budget: Duration::from_millis(retrieval.context_soft_budget_ms),
        }
    }
}

/// Request/hit/degraded counters, exposed for monitoring
#[derive(Debug, Default)]
pub struct ContextStats {
    pub requests: AtomicU64,
    pub with_context: AtomicU64,
    pub degraded: AtomicU64,
    pub over_budget: AtomicU64,
}

/// Public front door for per-turn retrieval
pub struct ContextService {
    retriever: Arc<HybridRetriever>,
    directory: Arc<dyn DocumentDirectory>,
    agent_scope: Arc<dyn AgentScope>,
    cache: Arc<MetadataCache>,
    config: ContextServiceConfig,
    pub stats: ContextStats,
}

impl ContextService {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        directory: Arc<dyn DocumentDirectory>,
        agent_scope: Arc<dyn AgentScope>,
        cache: Arc<MetadataCache>,
        config: ContextServiceConfig,
    ) -> Self {
        Self {
            retriever,
            directory,
            agent_scope,
            cache,
            config,
            stats: ContextStats::default(),
        }
    }

    /// Resolve an agent id into a search scope
    ///
    /// No agent → unrestricted within owner. An agent with zero links scopes
    /// to the empty set: it has no documents available.
    pub async fn resolve_scope(
        &self,
        owner_id: &str,
        agent_id: Option<Uuid>,
    ) -> Result<SearchScope, RetrievalError> {
        let allowed = match agent_id {
            None => None,
            Some(agent_id) => Some(self.agent_scope.allowed_documents(agent_id).await?),
        };
        Ok(SearchScope {
            owner_id: owner_id.to_string(),
            allowed_documents: allowed,
        })
    }

    /// Scoped search used by the search endpoint
    pub async fn search(
        &self,
        query: &str,
        owner_id: &str,
        agent_id: Option<Uuid>,
        top_k: Option<usize>,
    ) -> Vec<ScoredChunk> {
        let scope = match self.resolve_scope(owner_id, agent_id).await {
            Ok(scope) => scope,
            Err(err) => {
                tracing::warn!(owner = %owner_id, error = %err, "scope resolution failed");
                return Vec::new();
            }
        };

        self.retriever
            .retrieve(query, &scope, top_k, Some(self.config.similarity_threshold))
            .await
            .results
    }

    /// Build the context block for one user turn
    ///
    /// Never errors: every internal failure collapses into
    /// `has_context = false`, so the agent can always keep speaking.
    pub async fn build_context(
        &self,
        query: &str,
        owner_id: &str,
        agent_id: Option<Uuid>,
    ) -> ContextBlock {
        let started = Instant::now();
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("parley_context_requests_total").increment(1);

        let block = self.build_context_inner(query, owner_id, agent_id).await;

        let elapsed = started.elapsed();
        metrics::histogram!("parley_context_latency_seconds").record(elapsed.as_secs_f64());
        if elapsed > self.config.soft_budget {
            self.stats.over_budget.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                owner = %owner_id,
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = self.config.soft_budget.as_millis() as u64,
                "context build exceeded soft budget"
            );
        }
        if block.has_context {
            self.stats.with_context.fetch_add(1, Ordering::Relaxed);
        }

        block
    }

    async fn build_context_inner(
        &self,
        query: &str,
        owner_id: &str,
        agent_id: Option<Uuid>,
    ) -> ContextBlock {
        if query.trim().is_empty() {
            return ContextBlock::default();
        }

        let scope = match self.resolve_scope(owner_id, agent_id).await {
            Ok(scope) => scope,
            Err(err) => {
                tracing::warn!(owner = %owner_id, error = %err, "scope resolution failed");
                return ContextBlock::default();
            }
        };

        let RetrievalOutcome { results, degraded } = self
            .retriever
            .retrieve(
                query,
                &scope,
                Some(self.config.top_k),
                Some(self.config.similarity_threshold),
            )
            .await;

        if degraded {
            self.stats.degraded.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("parley_context_degraded_total").increment(1);
        }

        if results.is_empty() {
            return ContextBlock::default();
        }

        let titles = self.resolve_titles(&results).await;
        let context = format_context(&results, &titles, self.config.char_budget);

        ContextBlock {
            has_context: !context.is_empty(),
            context,
        }
    }

    /// Titles for every distinct document in the result list
    ///
    /// Cache first; misses fall through to the store and back-fill.
    async fn resolve_titles(&self, results: &[ScoredChunk]) -> HashMap<Uuid, String> {
        let mut titles = HashMap::new();

        for result in results {
            if titles.contains_key(&result.document_id) {
                continue;
            }

            if let Some(meta) = self.cache.get(result.document_id) {
                titles.insert(result.document_id, meta.title);
                continue;
            }

            match self.directory.document_meta(result.document_id).await {
                Ok(Some(meta)) => {
                    self.cache.insert(result.document_id, meta.clone());
                    titles.insert(result.document_id, meta.title);
                }
                Ok(None) => {
                    // Document deleted between search and formatting.
                    titles.insert(result.document_id, "Unknown".to_string());
                }
                Err(err) => {
                    tracing::warn!(document = %result.document_id, error = %err, "title lookup failed");
                    titles.insert(result.document_id, "Unknown".to_string());
                }
            }
        }

        titles
    }
}

/// Assemble the bounded context block
///
/// One block per result: a `From '<title>':` line followed by the chunk
/// content, blocks separated by blank lines. Output is cut at the character
/// budget on a char boundary; a result that does not fit at all is dropped.
fn format_context(
    results: &[ScoredChunk],
    titles: &HashMap<Uuid, String>,
    char_budget: usize,
) -> String {
    let mut out = String::new();

    for result in results {
        let unknown = "Unknown".to_string();
        let title = titles.get(&result.document_id).unwrap_or(&unknown);
        let block = format!("From '{}':\n{}", title, result.content.trim());

        let separator_len = if out.is_empty() { 0 } else { 2 };
        let used = out.chars().count();
        let remaining = char_budget.saturating_sub(used + separator_len);
        if remaining == 0 {
            break;
        }

        if !out.is_empty() {
            out.push_str("\n\n");
        }

        if block.chars().count() <= remaining {
            out.push_str(&block);
        } else {
            out.extend(block.chars().take(remaining));
            break;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(document_id: Uuid, content: &str) -> ScoredChunk {
        ScoredChunk {
            chunk_id: Uuid::new_v4(),
            document_id,
            content: content.to_string(),
            fused_score: 0.5,
            rerank_score: None,
        }
    }

    #[test]
    fn test_format_context_blocks() {
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let mut titles = HashMap::new();
        titles.insert(doc_a, "notes.txt".to_string());
        titles.insert(doc_b, "report.pdf".to_string());

        let results = vec![chunk(doc_a, "First chunk."), chunk(doc_b, "Second chunk.")];
        let context = format_context(&results, &titles, 4_000);

        assert!(context.starts_with("From 'notes.txt':\nFirst chunk."));
        assert!(context.contains("\n\nFrom 'report.pdf':\nSecond chunk."));
    }

    #[test]
    fn test_format_context_respects_budget() {
        let doc = Uuid::new_v4();
        let mut titles = HashMap::new();
        titles.insert(doc, "big".to_string());

        let results = vec![chunk(doc, &"x".repeat(10_000))];
        let context = format_context(&results, &titles, 100);

        assert_eq!(context.chars().count(), 100);
    }

    #[test]
    fn test_format_context_drops_results_past_budget() {
        let doc = Uuid::new_v4();
        let mut titles = HashMap::new();
        titles.insert(doc, "t".to_string());

        let results = vec![chunk(doc, &"a".repeat(90)), chunk(doc, "never reached")];
        let context = format_context(&results, &titles, 100);

        assert!(!context.contains("never reached"));
        assert!(context.chars().count() <= 100);
    }

    #[test]
    fn test_format_context_unknown_title() {
        let results = vec![chunk(Uuid::new_v4(), "orphan")];
        let context = format_context(&results, &HashMap::new(), 4_000);
        assert!(context.starts_with("From 'Unknown':"));
    }

    #[test]
    fn test_format_context_empty_results() {
        assert!(format_context(&[], &HashMap::new(), 4_000).is_empty());
    }
}
