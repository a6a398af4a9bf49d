//! Structured document model
//!
//! Provides:
//! - `DocumentStructure`, the capability interface the filling pipeline
//!   needs from a document (traversal, text get/set, insert-after)
//! - An arena-backed `Document` implementing it
//! - `DocumentCodec` for reading templates and writing artifacts

mod codec;
mod tree;

pub use codec::{DocumentCodec, JsonDocumentCodec};
pub use tree::{BlockDef, Document, DocumentDef};

use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParagraphId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub usize);

/// A node that directly holds paragraphs and tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    Paragraph(ParagraphId),
    Table(TableId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Body,
    TableCell,
}

/// Capabilities required to walk and rewrite a document tree.
///
/// Ids that do not belong to the document yield `InvalidDocumentStructure`.
pub trait DocumentStructure {
    /// Top-level container
    fn root(&self) -> ContainerId;

    fn container_kind(&self, container: ContainerId) -> Result<ContainerKind>;

    /// Direct paragraphs of a container, in document order
    fn paragraphs(&self, container: ContainerId) -> Result<Vec<ParagraphId>>;

    /// Direct tables of a container, in document order
    fn tables(&self, container: ContainerId) -> Result<Vec<TableId>>;

    /// Cell containers of a table, row-major
    fn cells(&self, table: TableId) -> Result<Vec<ContainerId>>;

    /// Container holding the paragraph
    fn parent(&self, paragraph: ParagraphId) -> Result<ContainerId>;

    fn text(&self, paragraph: ParagraphId) -> Result<String>;

    fn set_text(&mut self, paragraph: ParagraphId, text: &str) -> Result<()>;

    fn style(&self, paragraph: ParagraphId) -> Result<Option<String>>;

    fn set_style(&mut self, paragraph: ParagraphId, style: Option<&str>) -> Result<()>;

    /// Insert an unstyled paragraph immediately after `anchor` in the same container
    fn insert_paragraph_after(&mut self, anchor: ParagraphId, text: &str) -> Result<ParagraphId>;
}
