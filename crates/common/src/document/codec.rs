use super::{Document, DocumentDef};
use crate::errors::{AppError, Result};

/// Reads and writes documents in a storage format
pub trait DocumentCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Document>;

    fn encode(&self, document: &Document) -> Result<Vec<u8>>;
}

/// JSON form of [`DocumentDef`]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentCodec;

impl DocumentCodec for JsonDocumentCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Document> {
        let def: DocumentDef = serde_json::from_slice(bytes)
            .map_err(|e| AppError::invalid_structure(format!("undecodable document: {}", e)))?;
        Document::from_def(def)
    }

    fn encode(&self, document: &Document) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&document.to_def()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentStructure;

    #[test]
    fn test_decode_template() {
        let json = br#"{
            "styles": ["Normal"],
            "body": [
                {"type": "paragraph", "text": "<Summary>", "style": "Normal"},
                {"type": "table", "rows": [[[{"type": "paragraph", "text": "<Owner>"}]]]}
            ]
        }"#;

        let doc = JsonDocumentCodec.decode(json).unwrap();
        let root = doc.root();
        assert_eq!(doc.paragraphs(root).unwrap().len(), 1);
        assert_eq!(doc.tables(root).unwrap().len(), 1);
    }

    #[test]
    fn test_garbage_is_structure_error() {
        let err = JsonDocumentCodec.decode(b"not json").unwrap_err();
        assert!(matches!(err, AppError::InvalidDocumentStructure { .. }));
    }

    #[test]
    fn test_encode_then_decode_preserves_text() {
        let mut doc = Document::new();
        let root = doc.root();
        doc.push_paragraph(root, "hello", None).unwrap();

        let bytes = JsonDocumentCodec.encode(&doc).unwrap();
        let back = JsonDocumentCodec.decode(&bytes).unwrap();
        let p = back.paragraphs(back.root()).unwrap()[0];
        assert_eq!(back.text(p).unwrap(), "hello");
    }
}
