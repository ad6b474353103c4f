//! Schema definition
//!
//! Tables:
//! - documents(id, owner_id, title, doc_type, metadata, created_at, updated_at)
//! - document_sections(id, document_id, content, contextual_content,
//!   is_contextualized, embedding, chunk_index, metadata, created_at)
//! - user_agents(id, owner_id, name, instructions, voice_id, greeting, is_default)
//! - agent_documents(agent_id, document_id)
//! - contextual_processing_stats(per-ingest token and cost accounting)

use tokio_postgres::Client;

use crate::error::StoreError;

/// Create all tables and indexes if they do not exist
pub async fn create_tables(client: &Client, embedding_dim: usize) -> Result<(), StoreError> {
    client
        .batch_execute("CREATE EXTENSION IF NOT EXISTS vector")
        .await
        .map_err(|e| StoreError::Schema(e.to_string()))?;

    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id UUID PRIMARY KEY,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );

        CREATE INDEX IF NOT EXISTS documents_owner_idx ON documents (owner_id);

        CREATE TABLE IF NOT EXISTS document_sections (
            id UUID PRIMARY KEY,
            document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            contextual_content TEXT,
            is_contextualized BOOLEAN NOT NULL DEFAULT FALSE,
            embedding VECTOR({embedding_dim}) NOT NULL,
            chunk_index INTEGER NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (document_id, chunk_index)
        );

        CREATE INDEX IF NOT EXISTS document_sections_document_idx
            ON document_sections (document_id);

        CREATE INDEX IF NOT EXISTS document_sections_embedding_idx
            ON document_sections USING ivfflat (embedding vector_cosine_ops)
            WITH (lists = 100);

        CREATE TABLE IF NOT EXISTS user_agents (
            id UUID PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            instructions TEXT NOT NULL,
            voice_id TEXT NOT NULL,
            greeting TEXT NOT NULL,
            is_default BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );

        CREATE INDEX IF NOT EXISTS user_agents_owner_idx ON user_agents (owner_id);

        CREATE TABLE IF NOT EXISTS agent_documents (
            agent_id UUID NOT NULL REFERENCES user_agents(id) ON DELETE CASCADE,
            document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            PRIMARY KEY (agent_id, document_id)
        );

        CREATE TABLE IF NOT EXISTS contextual_processing_stats (
            id UUID PRIMARY KEY,
            document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            owner_id TEXT NOT NULL,
            total_chunks INTEGER NOT NULL,
            processed_chunks INTEGER NOT NULL,
            failed_chunks INTEGER NOT NULL,
            input_tokens BIGINT NOT NULL,
            output_tokens BIGINT NOT NULL,
            cache_creation_tokens BIGINT NOT NULL,
            cache_read_tokens BIGINT NOT NULL,
            total_tokens_used BIGINT NOT NULL,
            processing_time_seconds DOUBLE PRECISION NOT NULL,
            cost_estimate_usd DOUBLE PRECISION NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );

        CREATE INDEX IF NOT EXISTS contextual_stats_owner_idx
            ON contextual_processing_stats (owner_id);
        "#
    );

    client
        .batch_execute(&ddl)
        .await
        .map_err(|e| StoreError::Schema(e.to_string()))?;

    Ok(())
}
