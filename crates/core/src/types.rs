//! Domain types shared across the workspace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Kind of an uploaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Text,
}

impl DocumentType {
    /// Parse a declared type as it arrives on the upload form.
    ///
    /// `txt` is accepted as an alias for `text`; anything else is rejected.
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(DocumentType::Pdf),
            "text" | "txt" => Ok(DocumentType::Text),
            other => Err(Error::InvalidInput(format!(
                "unsupported document type: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Pdf => "pdf",
            DocumentType::Text => "text",
        }
    }
}

/// One uploaded source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    pub doc_type: DocumentType,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of stored sections; populated on list/get reads.
    pub chunk_count: i64,
}

/// One retrievable unit of a document
///
/// When `is_contextualized` is true, the embedding and the BM25 tokens were
/// derived from `contextual_content`; otherwise from `content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSection {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub contextual_content: Option<String>,
    pub is_contextualized: bool,
    pub chunk_index: i32,
    pub metadata: serde_json::Value,
}

impl DocumentSection {
    /// The text the retrieval side indexes and returns for this section.
    pub fn retrieval_text(&self) -> &str {
        self.contextual_content.as_deref().unwrap_or(&self.content)
    }
}

/// A persona configurable by an owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub instructions: String,
    pub voice_id: String,
    pub greeting: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// Token counters for one or more summarizer LLM calls
///
/// The prompt cache is a protocol detail of the summarizer backend; locally it
/// is just these four counters advanced on every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_creation: u64,
    pub cache_read: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_creation + self.cache_read
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_creation += other.cache_creation;
        self.cache_read += other.cache_read;
    }
}

/// Record of one ingest's contextualization cost; append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub document_id: Uuid,
    pub owner_id: String,
    pub total_chunks: i32,
    pub processed_chunks: i32,
    pub failed_chunks: i32,
    pub usage: TokenUsage,
    pub processing_time_seconds: f64,
    pub cost_estimate_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_type_parse() {
        assert_eq!(DocumentType::parse("pdf").unwrap(), DocumentType::Pdf);
        assert_eq!(DocumentType::parse("text").unwrap(), DocumentType::Text);
        assert_eq!(DocumentType::parse("TXT").unwrap(), DocumentType::Text);
        assert!(DocumentType::parse("docx").is_err());
    }

    #[test]
    fn test_retrieval_text_prefers_contextual() {
        let mut section = DocumentSection {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            content: "raw".to_string(),
            contextual_content: None,
            is_contextualized: false,
            chunk_index: 0,
            metadata: serde_json::json!({}),
        };
        assert_eq!(section.retrieval_text(), "raw");

        section.contextual_content = Some("situated\n\nraw".to_string());
        section.is_contextualized = true;
        assert_eq!(section.retrieval_text(), "situated\n\nraw");
    }

    #[test]
    fn test_token_usage_totals() {
        let mut usage = TokenUsage {
            input: 10,
            output: 5,
            cache_creation: 100,
            cache_read: 0,
        };
        usage.add(&TokenUsage {
            input: 2,
            output: 1,
            cache_creation: 0,
            cache_read: 100,
        });
        assert_eq!(usage.total(), 218);
        assert_eq!(usage.cache_read, 100);
    }
}
