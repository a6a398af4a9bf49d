//! docfill Ingestion Library
//!
//! Populates per-source collections:
//! 1. Extracts pages (text, images, tables) from the uploaded source
//! 2. Splits page text into overlapping chunks
//! 3. Describes images through the generation service
//! 4. Embeds every chunk and upserts it into the source's collection

pub mod chunker;
pub mod errors;
pub mod extractor;
pub mod pdf;
pub mod processor;

pub use errors::IngestionError;
pub use extractor::{ExtractedImage, ExtractedPage, ExtractedTable, SourceExtractor};
pub use pdf::LopdfExtractor;
pub use processor::IngestionProcessor;
