//! Contextual processing statistics

use uuid::Uuid;

use parley_core::ProcessingStats;

use crate::client::PgClient;
use crate::error::StoreError;

/// Per-owner aggregate of contextualization cost
#[derive(Debug, Clone, Default)]
pub struct ContextualSummary {
    pub total_documents: i64,
    pub total_chunks: i64,
    pub total_tokens: i64,
    pub estimated_cost_usd: f64,
}

/// Append-only store of per-ingest processing statistics
#[derive(Clone)]
pub struct StatsStore {
    client: PgClient,
}

impl StatsStore {
    pub fn new(client: PgClient) -> Self {
        Self { client }
    }

    /// Append one ProcessingStats row
    pub async fn record(&self, stats: &ProcessingStats) -> Result<(), StoreError> {
        self.client
            .shared()
            .execute(
                "INSERT INTO contextual_processing_stats
                     (id, document_id, owner_id, total_chunks, processed_chunks, failed_chunks,
                      input_tokens, output_tokens, cache_creation_tokens, cache_read_tokens,
                      total_tokens_used, processing_time_seconds, cost_estimate_usd)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
                &[
                    &Uuid::new_v4(),
                    &stats.document_id,
                    &stats.owner_id,
                    &stats.total_chunks,
                    &stats.processed_chunks,
                    &stats.failed_chunks,
                    &(stats.usage.input as i64),
                    &(stats.usage.output as i64),
                    &(stats.usage.cache_creation as i64),
                    &(stats.usage.cache_read as i64),
                    &(stats.usage.total() as i64),
                    &stats.processing_time_seconds,
                    &stats.cost_estimate_usd,
                ],
            )
            .await?;
        Ok(())
    }

    /// Aggregate an owner's contextualization cost
    pub async fn owner_summary(&self, owner_id: &str) -> Result<ContextualSummary, StoreError> {
        let row = self
            .client
            .shared()
            .query_one(
                "SELECT COUNT(DISTINCT document_id),
                        COALESCE(SUM(total_chunks), 0)::bigint,
                        COALESCE(SUM(total_tokens_used), 0)::bigint,
                        COALESCE(SUM(cost_estimate_usd), 0)::double precision
                 FROM contextual_processing_stats
                 WHERE owner_id = $1",
                &[&owner_id],
            )
            .await?;

        Ok(ContextualSummary {
            total_documents: row.get(0),
            total_chunks: row.get(1),
            total_tokens: row.get(2),
            estimated_cost_usd: row.get(3),
        })
    }
}
