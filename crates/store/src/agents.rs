//! Agent rows and agent-document links

use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use uuid::Uuid;

use parley_core::{Agent, DEFAULT_OWNER};

use crate::client::PgClient;
use crate::error::StoreError;

/// Fields required to create a persona
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub name: String,
    pub instructions: String,
    pub voice_id: String,
    pub greeting: String,
}

/// Typed operations over user_agents and agent_documents
#[derive(Clone)]
pub struct AgentStore {
    client: PgClient,
}

impl AgentStore {
    pub fn new(client: PgClient) -> Self {
        Self { client }
    }

    /// Create an owner-defined persona
    pub async fn create(&self, owner_id: &str, spec: NewAgent) -> Result<Agent, StoreError> {
        let id = Uuid::new_v4();
        let row = self
            .client
            .shared()
            .query_one(
                "INSERT INTO user_agents (id, owner_id, name, instructions, voice_id, greeting, is_default)
                 VALUES ($1, $2, $3, $4, $5, $6, FALSE)
                 RETURNING id, owner_id, name, instructions, voice_id, greeting, is_default, created_at",
                &[
                    &id,
                    &owner_id,
                    &spec.name,
                    &spec.instructions,
                    &spec.voice_id,
                    &spec.greeting,
                ],
            )
            .await?;

        Ok(row_to_agent(&row))
    }

    /// Insert a built-in persona; used once at schema setup
    pub async fn create_default(&self, spec: NewAgent) -> Result<Agent, StoreError> {
        let id = Uuid::new_v4();
        let row = self
            .client
            .shared()
            .query_one(
                "INSERT INTO user_agents (id, owner_id, name, instructions, voice_id, greeting, is_default)
                 VALUES ($1, $2, $3, $4, $5, $6, TRUE)
                 RETURNING id, owner_id, name, instructions, voice_id, greeting, is_default, created_at",
                &[
                    &id,
                    &DEFAULT_OWNER,
                    &spec.name,
                    &spec.instructions,
                    &spec.voice_id,
                    &spec.greeting,
                ],
            )
            .await?;

        Ok(row_to_agent(&row))
    }

    /// Whether any built-in personas have been seeded yet
    pub async fn defaults_seeded(&self) -> Result<bool, StoreError> {
        let row = self
            .client
            .shared()
            .query_one(
                "SELECT COUNT(*) FROM user_agents WHERE owner_id = $1",
                &[&DEFAULT_OWNER],
            )
            .await?;
        let count: i64 = row.get(0);
        Ok(count > 0)
    }

    /// An owner's personas plus the built-ins
    pub async fn list(&self, owner_id: &str) -> Result<Vec<Agent>, StoreError> {
        let rows = self
            .client
            .shared()
            .query(
                "SELECT id, owner_id, name, instructions, voice_id, greeting, is_default, created_at
                 FROM user_agents
                 WHERE owner_id = $1 OR owner_id = $2
                 ORDER BY is_default DESC, created_at",
                &[&owner_id, &DEFAULT_OWNER],
            )
            .await?;

        Ok(rows.iter().map(row_to_agent).collect())
    }

    /// Fetch one agent by id
    pub async fn get(&self, id: Uuid) -> Result<Option<Agent>, StoreError> {
        let row = self
            .client
            .shared()
            .query_opt(
                "SELECT id, owner_id, name, instructions, voice_id, greeting, is_default, created_at
                 FROM user_agents WHERE id = $1",
                &[&id],
            )
            .await?;

        Ok(row.as_ref().map(row_to_agent))
    }

    /// Delete an owner's persona; built-ins are never deletable
    ///
    /// Links cascade; documents are untouched.
    pub async fn delete(&self, owner_id: &str, id: Uuid) -> Result<(), StoreError> {
        let deleted = self
            .client
            .shared()
            .execute(
                "DELETE FROM user_agents
                 WHERE id = $1 AND owner_id = $2 AND NOT is_default",
                &[&id, &owner_id],
            )
            .await?;

        if deleted == 0 {
            return Err(StoreError::AgentNotFound(id));
        }

        tracing::info!(owner = %owner_id, agent = %id, "Deleted agent");
        Ok(())
    }

    /// Grant an agent read access to documents
    pub async fn link_documents(
        &self,
        agent_id: Uuid,
        document_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        for document_id in document_ids {
            self.client
                .shared()
                .execute(
                    "INSERT INTO agent_documents (agent_id, document_id)
                     VALUES ($1, $2)
                     ON CONFLICT DO NOTHING",
                    &[&agent_id, document_id],
                )
                .await?;
        }
        Ok(())
    }

    /// Revoke one agent-document link
    pub async fn unlink_document(
        &self,
        agent_id: Uuid,
        document_id: Uuid,
    ) -> Result<bool, StoreError> {
        let deleted = self
            .client
            .shared()
            .execute(
                "DELETE FROM agent_documents WHERE agent_id = $1 AND document_id = $2",
                &[&agent_id, &document_id],
            )
            .await?;
        Ok(deleted > 0)
    }

    /// The documents an agent may read
    pub async fn list_agent_documents(&self, agent_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let rows = self
            .client
            .shared()
            .query(
                "SELECT document_id FROM agent_documents WHERE agent_id = $1",
                &[&agent_id],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// How many of the given documents belong to the owner
    pub async fn count_owned_documents(
        &self,
        owner_id: &str,
        document_ids: &[Uuid],
    ) -> Result<i64, StoreError> {
        let ids: Vec<Uuid> = document_ids.to_vec();
        let row = self
            .client
            .shared()
            .query_one(
                "SELECT COUNT(*) FROM documents WHERE owner_id = $1 AND id = ANY($2)",
                &[&owner_id, &ids],
            )
            .await?;
        Ok(row.get(0))
    }
}

fn row_to_agent(row: &Row) -> Agent {
    let created_at: DateTime<Utc> = row.get("created_at");
    Agent {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        instructions: row.get("instructions"),
        voice_id: row.get("voice_id"),
        greeting: row.get("greeting"),
        is_default: row.get("is_default"),
        created_at,
    }
}
