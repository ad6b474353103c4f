//! Persistence error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Postgres connection error: {0}")]
    Connection(String),

    #[error("Postgres query error: {0}")]
    Query(String),

    #[error("Schema creation failed: {0}")]
    Schema(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(uuid::Uuid),

    #[error("Agent not found: {0}")]
    AgentNotFound(uuid::Uuid),

    #[error("Owner mismatch for {entity} {id}")]
    OwnerMismatch { entity: &'static str, id: uuid::Uuid },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}

impl From<StoreError> for parley_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DocumentNotFound(id) => {
                parley_core::Error::NotFound(format!("document {id}"))
            }
            StoreError::AgentNotFound(id) => parley_core::Error::NotFound(format!("agent {id}")),
            StoreError::OwnerMismatch { entity, id } => {
                parley_core::Error::Forbidden(format!("{entity} {id} belongs to another owner"))
            }
            other => parley_core::Error::Backend(other.to_string()),
        }
    }
}
