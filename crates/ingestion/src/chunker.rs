//! Text chunking module
//!
//! Splits page text into overlapping chunks for embedding.

use crate::errors::IngestionError;
use docfill_common::config::IngestionConfig;
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

/// Split text into chunks of at most `chunk_size` characters with
/// `chunk_overlap` characters shared between neighbours. Chunks shorter
/// than `min_chunk_size` are dropped unless they are the only chunk.
pub fn chunk_text(text: &str, config: &IngestionConfig) -> Result<Vec<String>, IngestionError> {
    let chunk_config = ChunkConfig::new(config.chunk_size)
        .with_overlap(config.chunk_overlap)
        .map_err(|e| IngestionError::Chunking(e.to_string()))?;
    let splitter = TextSplitter::new(chunk_config);

    let chunks: Vec<&str> = splitter.chunks(text).collect();

    debug!(
        input_len = text.len(),
        chunk_count = chunks.len(),
        chunk_size = config.chunk_size,
        "Text chunked"
    );

    if chunks.len() == 1 {
        return Ok(chunks.into_iter().map(str::to_string).collect());
    }

    Ok(chunks
        .into_iter()
        .filter(|c| c.chars().count() >= config.min_chunk_size)
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> IngestionConfig {
        IngestionConfig {
            chunk_size,
            chunk_overlap,
            min_chunk_size,
        }
    }

    #[test]
    fn test_basic_chunking() {
        let text = "This is a test. ".repeat(100);
        let config = config(200, 50, 50);

        let chunks = chunk_text(&text, &config).unwrap();
        assert!(chunks.len() > 1);

        for chunk in &chunks {
            assert!(chunk.chars().count() <= config.chunk_size);
            assert!(chunk.chars().count() >= config.min_chunk_size);
        }
    }

    #[test]
    fn test_short_text_kept_whole() {
        let chunks = chunk_text("Tiny page.", &config(1000, 200, 100)).unwrap();
        assert_eq!(chunks, vec!["Tiny page.".to_string()]);
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("", &IngestionConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_overlap_not_smaller_than_size_rejected() {
        let err = chunk_text("text", &config(100, 100, 0)).unwrap_err();
        assert!(matches!(err, IngestionError::Chunking(_)));
    }
}
