//! Section storage and vector search

use pgvector::Vector;
use uuid::Uuid;

use parley_core::DocumentType;

use crate::client::PgClient;
use crate::error::StoreError;

/// A section to be written during ingest
#[derive(Debug, Clone)]
pub struct NewSection {
    pub chunk_index: i32,
    pub content: String,
    pub contextual_content: Option<String>,
    pub is_contextualized: bool,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// A dense-search hit
#[derive(Debug, Clone)]
pub struct DenseHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub score: f32,
    pub is_contextualized: bool,
}

/// A chunk as fed to the sparse index builder
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub chunk_index: i32,
}

/// Typed operations over the document_sections table
#[derive(Clone)]
pub struct SectionStore {
    client: PgClient,
    embedding_dim: usize,
}

impl SectionStore {
    pub fn new(client: PgClient, embedding_dim: usize) -> Self {
        Self {
            client,
            embedding_dim,
        }
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Insert a document together with all of its sections, atomically
    ///
    /// Runs on a dedicated connection so the transaction cannot interleave
    /// with pipelined queries on the shared connection. Either the document
    /// row and every section land, or nothing does.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_document_with_sections(
        &self,
        owner_id: &str,
        title: &str,
        doc_type: DocumentType,
        metadata: serde_json::Value,
        sections: Vec<NewSection>,
    ) -> Result<Uuid, StoreError> {
        for section in &sections {
            if section.embedding.len() != self.embedding_dim {
                return Err(StoreError::Query(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.embedding_dim,
                    section.embedding.len()
                )));
            }
        }

        let document_id = Uuid::new_v4();
        let mut conn = self.client.dedicated().await?;
        let tx = conn.transaction().await?;

        tx.execute(
            "INSERT INTO documents (id, owner_id, title, doc_type, metadata)
             VALUES ($1, $2, $3, $4, $5)",
            &[&document_id, &owner_id, &title, &doc_type.as_str(), &metadata],
        )
        .await?;

        let stmt = tx
            .prepare(
                "INSERT INTO document_sections
                     (id, document_id, content, contextual_content, is_contextualized,
                      embedding, chunk_index, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .await?;

        for section in &sections {
            let embedding = Vector::from(section.embedding.clone());
            tx.execute(
                &stmt,
                &[
                    &Uuid::new_v4(),
                    &document_id,
                    &section.content,
                    &section.contextual_content,
                    &section.is_contextualized,
                    &embedding,
                    &section.chunk_index,
                    &section.metadata,
                ],
            )
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            owner = %owner_id,
            document = %document_id,
            sections = sections.len(),
            "Stored document"
        );

        Ok(document_id)
    }

    /// Cosine similarity search over an owner's sections
    ///
    /// Returns sections above `threshold`, best first, at most `limit`.
    /// Contextual content is returned in place of the raw chunk when present.
    /// `allow` restricts results to the given documents when set.
    pub async fn vector_search(
        &self,
        owner_id: &str,
        query: &[f32],
        threshold: f32,
        limit: i64,
        allow: Option<&Vec<Uuid>>,
    ) -> Result<Vec<DenseHit>, StoreError> {
        let query_vec = Vector::from(query.to_vec());
        let threshold = threshold as f64;

        let rows = self
            .client
            .shared()
            .query(
                "SELECT s.id, s.document_id,
                        COALESCE(s.contextual_content, s.content) AS content,
                        s.is_contextualized,
                        1 - (s.embedding <=> $2) AS similarity
                 FROM document_sections s
                 JOIN documents d ON d.id = s.document_id
                 WHERE d.owner_id = $1
                   AND 1 - (s.embedding <=> $2) > $3
                   AND ($4::uuid[] IS NULL OR s.document_id = ANY($4))
                 ORDER BY s.embedding <=> $2
                 LIMIT $5",
                &[&owner_id, &query_vec, &threshold, &allow, &limit],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let similarity: f64 = r.get("similarity");
                DenseHit {
                    chunk_id: r.get("id"),
                    document_id: r.get("document_id"),
                    content: r.get("content"),
                    score: similarity as f32,
                    is_contextualized: r.get("is_contextualized"),
                }
            })
            .collect())
    }

    /// All of an owner's chunks, for sparse-index rebuilds
    ///
    /// Returns the contextual form when a chunk has one, so the sparse tokens
    /// always match what the dense side indexed.
    pub async fn get_all_chunks(&self, owner_id: &str) -> Result<Vec<IndexedChunk>, StoreError> {
        let rows = self
            .client
            .shared()
            .query(
                "SELECT s.id, s.document_id,
                        COALESCE(s.contextual_content, s.content) AS content,
                        s.chunk_index
                 FROM document_sections s
                 JOIN documents d ON d.id = s.document_id
                 WHERE d.owner_id = $1
                 ORDER BY s.document_id, s.chunk_index",
                &[&owner_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|r| IndexedChunk {
                chunk_id: r.get(0),
                document_id: r.get(1),
                content: r.get(2),
                chunk_index: r.get(3),
            })
            .collect())
    }
}
