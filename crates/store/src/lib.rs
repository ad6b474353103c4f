//! Postgres persistence layer for the Parley retrieval service
//!
//! Provides durable storage for:
//! - Documents and their sections (with pgvector embeddings)
//! - Agents and agent-document links
//! - Contextual processing statistics
//!
//! Every section read path joins to `documents` on `owner_id`; a caller can
//! never observe another owner's chunks through this crate.

pub mod agents;
pub mod client;
pub mod documents;
pub mod error;
pub mod schema;
pub mod sections;
pub mod stats;

pub use agents::{AgentStore, NewAgent};
pub use client::{PgClient, PgConfig};
pub use documents::{DocumentStore, SectionView};
pub use error::StoreError;
pub use sections::{DenseHit, IndexedChunk, NewSection, SectionStore};
pub use stats::{ContextualSummary, StatsStore};

/// Initialize the persistence layer: connect, ensure schema, hand out stores.
pub async fn init(config: PgConfig, embedding_dim: usize) -> Result<StoreLayer, StoreError> {
    let client = PgClient::connect(config).await?;
    client.ensure_schema(embedding_dim).await?;

    Ok(StoreLayer {
        documents: DocumentStore::new(client.clone()),
        sections: SectionStore::new(client.clone(), embedding_dim),
        agents: AgentStore::new(client.clone()),
        stats: StatsStore::new(client.clone()),
        client,
    })
}

/// Combined persistence layer with all typed stores
#[derive(Clone)]
pub struct StoreLayer {
    pub client: PgClient,
    pub documents: DocumentStore,
    pub sections: SectionStore,
    pub agents: AgentStore,
    pub stats: StatsStore,
}
