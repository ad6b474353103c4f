//! Store-backed implementations of the retrieval seams

use async_trait::async_trait;
use uuid::Uuid;

use parley_store::{AgentStore, DenseHit, DocumentStore, SectionStore};

use crate::cache::DocumentMeta;
use crate::context::{AgentScope, DocumentDirectory};
use crate::retriever::DenseSearcher;
use crate::RetrievalError;

#[async_trait]
impl DenseSearcher for SectionStore {
    async fn search(
        &self,
        owner_id: &str,
        query: &[f32],
        threshold: f32,
        limit: i64,
        allow: Option<&Vec<Uuid>>,
    ) -> Result<Vec<DenseHit>, RetrievalError> {
        Ok(self
            .vector_search(owner_id, query, threshold, limit, allow)
            .await?)
    }
}

#[async_trait]
impl DocumentDirectory for DocumentStore {
    async fn document_meta(&self, id: Uuid) -> Result<Option<DocumentMeta>, RetrievalError> {
        Ok(self
            .meta(id)
            .await?
            .map(|(title, doc_type)| DocumentMeta { title, doc_type }))
    }
}

#[async_trait]
impl AgentScope for AgentStore {
    async fn allowed_documents(&self, agent_id: Uuid) -> Result<Vec<Uuid>, RetrievalError> {
        Ok(self.list_agent_documents(agent_id).await?)
    }
}
