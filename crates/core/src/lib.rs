//! Core types for the Parley retrieval service
//!
//! This crate provides the foundational pieces shared across all other crates:
//! - Domain types (documents, sections, agents, processing statistics)
//! - The error taxonomy and `Result` alias

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    Agent, Document, DocumentSection, DocumentType, ProcessingStats, TokenUsage,
};

/// Owner id under which the built-in personas are stored.
pub const DEFAULT_OWNER: &str = "_default";
