//! Source extraction contract

use crate::errors::IngestionError;
use serde::{Deserialize, Serialize};

/// An embedded image lifted from a source page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedImage {
    pub name: String,
    pub mime: String,
    pub data: Vec<u8>,
}

/// A table rendered as markdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub markdown: String,
}

/// Content of one page or unit of a source document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedPage {
    /// Page or unit identifier, e.g. "3"
    pub label: String,
    pub text: String,
    pub images: Vec<ExtractedImage>,
    pub tables: Vec<ExtractedTable>,
}

/// Turns raw source bytes into ordered pages
pub trait SourceExtractor: Send + Sync {
    fn extract(&self, source_name: &str, bytes: &[u8]) -> Result<Vec<ExtractedPage>, IngestionError>;
}
