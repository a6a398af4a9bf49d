//! PDF text extraction module
//!
//! Extracts per-page text content from PDF files using lopdf.

use crate::errors::IngestionError;
use crate::extractor::{ExtractedPage, SourceExtractor};
use tracing::{debug, warn};

/// Text-only PDF extractor. Images and tables are not recovered.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfExtractor;

impl SourceExtractor for LopdfExtractor {
    fn extract(&self, source_name: &str, bytes: &[u8]) -> Result<Vec<ExtractedPage>, IngestionError> {
        let doc = lopdf::Document::load_mem(bytes).map_err(|e| IngestionError::Parse {
            source_name: source_name.to_string(),
            message: format!("Failed to load PDF: {}", e),
        })?;

        let pages = doc.get_pages();
        debug!(page_count = pages.len(), "Extracting text from PDF");

        let mut extracted = Vec::with_capacity(pages.len());
        for page_num in pages.keys() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) => extracted.push(ExtractedPage {
                    label: page_num.to_string(),
                    text: clean_text(&text),
                    ..Default::default()
                }),
                Err(e) => {
                    warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
                }
            }
        }

        if extracted.iter().all(|p| p.text.is_empty()) {
            return Err(IngestionError::Empty(source_name.to_string()));
        }

        Ok(extracted)
    }
}

/// Collapse whitespace runs and strip byte-order marks
fn clean_text(text: &str) -> String {
    text.replace('\u{FEFF}', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
