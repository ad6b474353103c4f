//! Ingest orchestration
//!
//! Serial per document: parse → chunk → enrich → embed → store, then the
//! owner's sparse index rebuilds off the query path. Embeddings are produced
//! before any row is written, and the document plus all sections commit in
//! one transaction, so a failed ingest leaves nothing behind.

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use parley_config::IngestConfig;
use parley_core::{DocumentType, ProcessingStats};
use parley_retrieval::{Bm25Registry, MetadataCache, TextEmbedder};
use parley_store::{DocumentStore, NewSection, SectionStore, StatsStore};

use crate::chunk::TokenChunker;
use crate::contextual::{AnnotatedChunk, Contextualizer};
use crate::error::IngestError;
use crate::parse::parse_document;

/// Outcome of a successful ingest
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub document_id: Uuid,
    pub chunk_count: usize,
}

/// The ingestion pipeline and its mutation-side bookkeeping
pub struct IngestPipeline {
    chunker: TokenChunker,
    contextualizer: Option<Contextualizer>,
    embedder: Arc<dyn TextEmbedder>,
    documents: DocumentStore,
    sections: SectionStore,
    stats: StatsStore,
    registry: Arc<Bm25Registry>,
    metadata_cache: Arc<MetadataCache>,
    config: IngestConfig,
}

impl IngestPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: IngestConfig,
        contextualizer: Option<Contextualizer>,
        embedder: Arc<dyn TextEmbedder>,
        documents: DocumentStore,
        sections: SectionStore,
        stats: StatsStore,
        registry: Arc<Bm25Registry>,
        metadata_cache: Arc<MetadataCache>,
    ) -> Self {
        Self {
            chunker: TokenChunker::from_config(&config),
            contextualizer,
            embedder,
            documents,
            sections,
            stats,
            registry,
            metadata_cache,
            config,
        }
    }

    /// Ingest one uploaded blob for an owner
    pub async fn ingest(
        &self,
        owner_id: &str,
        title: &str,
        doc_type: DocumentType,
        bytes: &[u8],
    ) -> Result<IngestReceipt, IngestError> {
        let started = Instant::now();

        let text = parse_document(bytes, doc_type)?;
        let drafts = self.chunker.split(&text);
        if drafts.is_empty() {
            return Err(IngestError::EmptyDocument);
        }

        let chunks: Vec<AnnotatedChunk> = drafts.iter().map(AnnotatedChunk::from_draft).collect();
        let (chunks, report) = match &self.contextualizer {
            Some(contextualizer) => contextualizer.process(&text, chunks).await,
            None => (chunks, Default::default()),
        };

        // Embed the form that will be retrieved; raw chunks embed as-is.
        let embed_inputs: Vec<String> = chunks
            .iter()
            .map(|c| {
                c.contextual_content
                    .clone()
                    .unwrap_or_else(|| c.content.clone())
            })
            .collect();
        let embeddings = self.embed_with_retry(&embed_inputs).await?;

        let contextualized = chunks.iter().filter(|c| c.is_contextualized).count();
        let metadata = serde_json::json!({
            "chunk_count": chunks.len(),
            "contextualized_chunks": contextualized,
            "byte_size": bytes.len(),
        });

        let sections: Vec<NewSection> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| NewSection {
                chunk_index: chunk.index as i32,
                content: chunk.content.clone(),
                contextual_content: chunk.contextual_content.clone(),
                is_contextualized: chunk.is_contextualized,
                embedding,
                metadata: serde_json::json!({}),
            })
            .collect();

        let chunk_count = sections.len();
        let document_id = self
            .sections
            .insert_document_with_sections(owner_id, title, doc_type, metadata, sections)
            .await?;

        if self.contextualizer.is_some() {
            let stats = ProcessingStats {
                document_id,
                owner_id: owner_id.to_string(),
                total_chunks: report.total as i32,
                processed_chunks: report.processed as i32,
                failed_chunks: report.failed as i32,
                usage: report.usage,
                processing_time_seconds: report.elapsed_seconds,
                cost_estimate_usd: report.cost_estimate_usd,
            };
            if let Err(err) = self.stats.record(&stats).await {
                // Stats are advisory; the document is already durable.
                tracing::warn!(document = %document_id, error = %err, "failed to record processing stats");
            }
        }

        self.refresh_owner_index(owner_id).await;

        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs(self.config.soft_deadline_seconds) {
            tracing::warn!(
                owner = %owner_id,
                elapsed_s = elapsed.as_secs(),
                "ingest exceeded soft deadline"
            );
        }
        metrics::counter!("parley_ingest_documents_total").increment(1);
        metrics::counter!("parley_ingest_chunks_total").increment(chunk_count as u64);
        metrics::histogram!("parley_ingest_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            owner = %owner_id,
            document = %document_id,
            chunks = chunk_count,
            elapsed_ms = elapsed.as_millis() as u64,
            "ingest complete"
        );

        Ok(IngestReceipt {
            document_id,
            chunk_count,
        })
    }

    /// Delete a document and refresh the owner's caches and index
    pub async fn remove(&self, owner_id: &str, document_id: Uuid) -> Result<(), IngestError> {
        self.documents.delete(owner_id, document_id).await?;
        self.metadata_cache.invalidate(document_id);
        self.refresh_owner_index(owner_id).await;
        Ok(())
    }

    /// Rebuild the owner's BM25 snapshot from the store
    ///
    /// Runs after every mutation; queries keep using the previous snapshot
    /// until the new one publishes.
    pub async fn refresh_owner_index(&self, owner_id: &str) {
        match self.sections.get_all_chunks(owner_id).await {
            Ok(chunks) => self.registry.rebuild(owner_id, chunks),
            Err(err) => {
                tracing::error!(owner = %owner_id, error = %err, "sparse index rebuild failed");
            }
        }
    }

    /// Embed with exponential backoff, up to the configured attempt count
    async fn embed_with_retry(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        let attempts = self.config.embed_max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = Duration::from_millis(200 * (1 << attempt.min(5)));
                tokio::time::sleep(backoff).await;
            }
            match self.embedder.embed(inputs).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(err) => {
                    tracing::warn!(attempt = attempt + 1, attempts, error = %err, "embedding attempt failed");
                    last_error = Some(err);
                }
            }
        }

        Err(IngestError::EmbeddingBackend(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown embedding failure".to_string()),
        ))
    }
}
