//! Document reads and deletion

use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use uuid::Uuid;

use parley_core::{Document, DocumentType};

use crate::client::PgClient;
use crate::error::StoreError;

/// Read-side view of one stored section (without the embedding)
#[derive(Debug, Clone)]
pub struct SectionView {
    pub id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    pub contextual_content: Option<String>,
    pub is_contextualized: bool,
}

/// Typed operations over the documents table
#[derive(Clone)]
pub struct DocumentStore {
    client: PgClient,
}

impl DocumentStore {
    pub fn new(client: PgClient) -> Self {
        Self { client }
    }

    /// List an owner's documents, newest first, with chunk counts
    pub async fn list(&self, owner_id: &str) -> Result<Vec<Document>, StoreError> {
        let rows = self
            .client
            .shared()
            .query(
                "SELECT d.id, d.owner_id, d.title, d.doc_type, d.metadata,
                        d.created_at, d.updated_at, COUNT(s.id) AS chunk_count
                 FROM documents d
                 LEFT JOIN document_sections s ON s.document_id = d.id
                 WHERE d.owner_id = $1
                 GROUP BY d.id
                 ORDER BY d.created_at DESC",
                &[&owner_id],
            )
            .await?;

        rows.iter().map(row_to_document).collect()
    }

    /// Fetch one document, scoped by owner
    pub async fn get(&self, owner_id: &str, id: Uuid) -> Result<Option<Document>, StoreError> {
        let row = self
            .client
            .shared()
            .query_opt(
                "SELECT d.id, d.owner_id, d.title, d.doc_type, d.metadata,
                        d.created_at, d.updated_at, COUNT(s.id) AS chunk_count
                 FROM documents d
                 LEFT JOIN document_sections s ON s.document_id = d.id
                 WHERE d.id = $1 AND d.owner_id = $2
                 GROUP BY d.id",
                &[&id, &owner_id],
            )
            .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    /// Title and type for a document, regardless of owner
    ///
    /// Only called with document ids that came out of an owner-scoped search,
    /// so it does not re-check ownership.
    pub async fn meta(&self, id: Uuid) -> Result<Option<(String, DocumentType)>, StoreError> {
        let row = self
            .client
            .shared()
            .query_opt("SELECT title, doc_type FROM documents WHERE id = $1", &[&id])
            .await?;

        row.map(|r| {
            let title: String = r.get(0);
            let doc_type = parse_doc_type(r.get(1))?;
            Ok((title, doc_type))
        })
        .transpose()
    }

    /// Sections of one document in chunk order, scoped by owner
    pub async fn sections(
        &self,
        owner_id: &str,
        document_id: Uuid,
    ) -> Result<Vec<SectionView>, StoreError> {
        let rows = self
            .client
            .shared()
            .query(
                "SELECT s.id, s.chunk_index, s.content, s.contextual_content, s.is_contextualized
                 FROM document_sections s
                 JOIN documents d ON d.id = s.document_id
                 WHERE s.document_id = $1 AND d.owner_id = $2
                 ORDER BY s.chunk_index",
                &[&document_id, &owner_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|r| SectionView {
                id: r.get(0),
                chunk_index: r.get(1),
                content: r.get(2),
                contextual_content: r.get(3),
                is_contextualized: r.get(4),
            })
            .collect())
    }

    /// Delete a document; cascades to sections and agent links
    ///
    /// Returns `DocumentNotFound` when no row matched (missing or not owned).
    pub async fn delete(&self, owner_id: &str, id: Uuid) -> Result<(), StoreError> {
        let deleted = self
            .client
            .shared()
            .execute(
                "DELETE FROM documents WHERE id = $1 AND owner_id = $2",
                &[&id, &owner_id],
            )
            .await?;

        if deleted == 0 {
            return Err(StoreError::DocumentNotFound(id));
        }

        tracing::info!(owner = %owner_id, document = %id, "Deleted document");
        Ok(())
    }

    /// All owners with at least one document; used for index warm-up
    pub async fn owners(&self) -> Result<Vec<String>, StoreError> {
        let rows = self
            .client
            .shared()
            .query("SELECT DISTINCT owner_id FROM documents", &[])
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }
}

fn row_to_document(row: &Row) -> Result<Document, StoreError> {
    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");
    Ok(Document {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        doc_type: parse_doc_type(row.get("doc_type"))?,
        metadata: row.get("metadata"),
        created_at,
        updated_at,
        chunk_count: row.get("chunk_count"),
    })
}

fn parse_doc_type(raw: &str) -> Result<DocumentType, StoreError> {
    DocumentType::parse(raw)
        .map_err(|_| StoreError::Query(format!("unknown doc_type in database: {raw}")))
}
