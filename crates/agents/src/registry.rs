//! Agent registry

use uuid::Uuid;

use parley_core::{Agent, Error, Result, DEFAULT_OWNER};
use parley_store::{AgentStore, NewAgent};

use crate::templates::builtin_templates;

/// Owner-scoped persona CRUD over the store
#[derive(Clone)]
pub struct AgentRegistry {
    agents: AgentStore,
}

impl AgentRegistry {
    pub fn new(agents: AgentStore) -> Self {
        Self { agents }
    }

    /// Seed the built-in personas once; later calls are no-ops
    pub async fn seed_defaults(&self) -> Result<()> {
        if self.agents.defaults_seeded().await.map_err(Error::from)? {
            return Ok(());
        }

        for template in builtin_templates() {
            self.agents
                .create_default(NewAgent {
                    name: template.name.to_string(),
                    instructions: template.instructions.to_string(),
                    voice_id: template.voice_id.to_string(),
                    greeting: template.greeting.to_string(),
                })
                .await
                .map_err(Error::from)?;
        }

        tracing::info!(count = builtin_templates().len(), "Seeded default personas");
        Ok(())
    }

    /// Create a persona for an owner
    pub async fn create(&self, owner_id: &str, spec: NewAgent) -> Result<Agent> {
        if owner_id == DEFAULT_OWNER {
            return Err(Error::Forbidden(
                "the default owner is reserved for built-in personas".to_string(),
            ));
        }
        if spec.name.trim().is_empty() {
            return Err(Error::invalid_input("agent name must not be empty"));
        }
        if spec.instructions.trim().is_empty() {
            return Err(Error::invalid_input("agent instructions must not be empty"));
        }

        Ok(self.agents.create(owner_id, spec).await?)
    }

    /// An owner's personas plus the built-ins
    pub async fn list(&self, owner_id: &str) -> Result<Vec<Agent>> {
        Ok(self.agents.list(owner_id).await?)
    }

    /// Delete an owner's persona; links cascade, documents are untouched
    pub async fn delete(&self, owner_id: &str, agent_id: Uuid) -> Result<()> {
        Ok(self.agents.delete(owner_id, agent_id).await?)
    }

    /// Grant an agent read access to the owner's documents
    ///
    /// The agent must be visible to the owner and every document must belong
    /// to the owner; a single foreign document rejects the whole request.
    pub async fn link_documents(
        &self,
        owner_id: &str,
        agent_id: Uuid,
        document_ids: &[Uuid],
    ) -> Result<()> {
        if document_ids.is_empty() {
            return Err(Error::invalid_input("document_ids must not be empty"));
        }

        self.authorize_agent(owner_id, agent_id).await?;

        let owned = self
            .agents
            .count_owned_documents(owner_id, document_ids)
            .await?;
        if owned as usize != document_ids.len() {
            return Err(Error::Forbidden(
                "one or more documents belong to another owner".to_string(),
            ));
        }

        Ok(self.agents.link_documents(agent_id, document_ids).await?)
    }

    /// Revoke one agent-document link
    pub async fn unlink_document(
        &self,
        owner_id: &str,
        agent_id: Uuid,
        document_id: Uuid,
    ) -> Result<()> {
        self.authorize_agent(owner_id, agent_id).await?;

        let removed = self.agents.unlink_document(agent_id, document_id).await?;
        if !removed {
            return Err(Error::not_found(format!(
                "no link between agent {agent_id} and document {document_id}"
            )));
        }
        Ok(())
    }

    /// The documents an agent may read
    pub async fn list_agent_documents(
        &self,
        owner_id: &str,
        agent_id: Uuid,
    ) -> Result<Vec<Uuid>> {
        self.authorize_agent(owner_id, agent_id).await?;
        Ok(self.agents.list_agent_documents(agent_id).await?)
    }

    /// An agent is usable by an owner when they own it or it is a built-in
    async fn authorize_agent(&self, owner_id: &str, agent_id: Uuid) -> Result<Agent> {
        let agent = self
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("agent {agent_id}")))?;

        if agent.owner_id != owner_id && !agent.is_default {
            return Err(Error::Forbidden(format!(
                "agent {agent_id} belongs to another owner"
            )));
        }
        Ok(agent)
    }
}
