//! Blob parsing
//!
//! Turns an uploaded byte blob into plain text. PDF pages are extracted in
//! order and joined with a blank line; a page with no extractable text
//! contributes an empty string so positional alignment survives downstream.

use parley_core::DocumentType;

use crate::error::IngestError;

/// Extract plain text from a blob of the declared type
pub fn parse_document(bytes: &[u8], doc_type: DocumentType) -> Result<String, IngestError> {
    let text = match doc_type {
        DocumentType::Text => String::from_utf8(bytes.to_vec())
            .map_err(|e| IngestError::CorruptInput(format!("invalid UTF-8: {e}")))?,
        DocumentType::Pdf => {
            let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
                .map_err(|e| IngestError::CorruptInput(format!("pdf extraction failed: {e}")))?;
            pages.join("\n\n")
        }
    };

    if text.trim().is_empty() {
        return Err(IngestError::EmptyDocument);
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text() {
        let text = parse_document("plain notes".as_bytes(), DocumentType::Text).unwrap();
        assert_eq!(text, "plain notes");
    }

    #[test]
    fn test_parse_text_rejects_invalid_utf8() {
        let err = parse_document(&[0xff, 0xfe, 0x00], DocumentType::Text).unwrap_err();
        assert!(matches!(err, IngestError::CorruptInput(_)));
    }

    #[test]
    fn test_parse_rejects_empty_text() {
        let err = parse_document("   \n\t ".as_bytes(), DocumentType::Text).unwrap_err();
        assert!(matches!(err, IngestError::EmptyDocument));
    }

    #[test]
    fn test_parse_rejects_garbage_pdf() {
        let err = parse_document(b"not a pdf at all", DocumentType::Pdf).unwrap_err();
        assert!(matches!(err, IngestError::CorruptInput(_)));
    }
}
