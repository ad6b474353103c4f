//! Ingestion error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported document type: {0}")]
    UnsupportedType(String),

    #[error("Corrupt input: {0}")]
    CorruptInput(String),

    #[error("Document contains no extractable text")]
    EmptyDocument,

    #[error("Embedding backend error: {0}")]
    EmbeddingBackend(String),

    #[error("Summarizer backend error: {0}")]
    Annotation(String),

    #[error("Daily contextualization budget exhausted")]
    DailyBudgetExhausted,

    #[error("Store error: {0}")]
    Store(#[from] parley_store::StoreError),
}

impl From<IngestError> for parley_core::Error {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::UnsupportedType(t) => {
                parley_core::Error::InvalidInput(format!("unsupported document type: {t}"))
            }
            IngestError::CorruptInput(msg) => {
                parley_core::Error::InvalidInput(format!("corrupt input: {msg}"))
            }
            IngestError::EmptyDocument => {
                parley_core::Error::InvalidInput("document contains no extractable text".to_string())
            }
            IngestError::DailyBudgetExhausted => parley_core::Error::CapacityExceeded(
                "daily contextualization budget exhausted".to_string(),
            ),
            IngestError::Store(e) => e.into(),
            other => parley_core::Error::Backend(other.to_string()),
        }
    }
}
