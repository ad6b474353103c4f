//! Document ingestion pipeline
//!
//! blob → parse → chunk → (optional contextual enrichment) → embed → store,
//! then a sparse-index rebuild signal. Ingest fails loudly: a document that
//! cannot be parsed or embedded is not persisted at all.

pub mod chunk;
pub mod contextual;
pub mod error;
pub mod parse;
pub mod pipeline;

pub use chunk::{ChunkDraft, TokenChunker};
pub use contextual::{
    AnnotatedChunk, Annotation, AnthropicAnnotator, ChunkAnnotator, Contextualizer,
    ContextualReport,
};
pub use error::IngestError;
pub use parse::parse_document;
pub use pipeline::{IngestPipeline, IngestReceipt};
