//! Arena-backed document tree

use super::{Block, ContainerId, ContainerKind, DocumentStructure, ParagraphId, TableId};
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
struct ParagraphNode {
    text: String,
    style: Option<String>,
    parent: ContainerId,
}

#[derive(Debug, Clone)]
struct TableNode {
    rows: Vec<Vec<ContainerId>>,
}

#[derive(Debug, Clone)]
struct ContainerNode {
    kind: ContainerKind,
    blocks: Vec<Block>,
}

/// In-memory structured document: a body of paragraphs and tables whose
/// cells may again hold paragraphs and tables.
#[derive(Debug, Clone)]
pub struct Document {
    containers: Vec<ContainerNode>,
    paragraphs: Vec<ParagraphNode>,
    tables: Vec<TableNode>,
    /// Declared style names. `None` accepts any style.
    styles: Option<BTreeSet<String>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document with a body container and no declared styles
    pub fn new() -> Self {
        Self {
            containers: vec![ContainerNode {
                kind: ContainerKind::Body,
                blocks: Vec::new(),
            }],
            paragraphs: Vec::new(),
            tables: Vec::new(),
            styles: None,
        }
    }

    /// Restrict paragraph styles to the given names
    pub fn with_styles<I, S>(mut self, styles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.styles = Some(styles.into_iter().map(Into::into).collect());
        self
    }

    fn container(&self, id: ContainerId) -> Result<&ContainerNode> {
        self.containers
            .get(id.0)
            .ok_or_else(|| AppError::invalid_structure(format!("unknown container {}", id.0)))
    }

    fn container_mut(&mut self, id: ContainerId) -> Result<&mut ContainerNode> {
        self.containers
            .get_mut(id.0)
            .ok_or_else(|| AppError::invalid_structure(format!("unknown container {}", id.0)))
    }

    fn paragraph(&self, id: ParagraphId) -> Result<&ParagraphNode> {
        self.paragraphs
            .get(id.0)
            .ok_or_else(|| AppError::invalid_structure(format!("unknown paragraph {}", id.0)))
    }

    fn paragraph_mut(&mut self, id: ParagraphId) -> Result<&mut ParagraphNode> {
        self.paragraphs
            .get_mut(id.0)
            .ok_or_else(|| AppError::invalid_structure(format!("unknown paragraph {}", id.0)))
    }

    fn check_style(&self, style: &str) -> Result<()> {
        match &self.styles {
            Some(declared) if !declared.contains(style) => Err(AppError::invalid_structure(
                format!("style '{}' is not declared", style),
            )),
            _ => Ok(()),
        }
    }

    /// Append a paragraph to the end of a container
    pub fn push_paragraph(
        &mut self,
        container: ContainerId,
        text: impl Into<String>,
        style: Option<&str>,
    ) -> Result<ParagraphId> {
        if let Some(style) = style {
            self.check_style(style)?;
        }
        self.container(container)?;

        let id = ParagraphId(self.paragraphs.len());
        self.paragraphs.push(ParagraphNode {
            text: text.into(),
            style: style.map(str::to_string),
            parent: container,
        });
        self.container_mut(container)?.blocks.push(Block::Paragraph(id));
        Ok(id)
    }

    /// Append a `rows` x `cols` table of empty cells to a container
    pub fn push_table(&mut self, container: ContainerId, rows: usize, cols: usize) -> Result<TableId> {
        self.container(container)?;

        let mut grid = Vec::with_capacity(rows);
        for _ in 0..rows {
            let mut row = Vec::with_capacity(cols);
            for _ in 0..cols {
                row.push(self.new_cell());
            }
            grid.push(row);
        }

        let id = TableId(self.tables.len());
        self.tables.push(TableNode { rows: grid });
        self.container_mut(container)?.blocks.push(Block::Table(id));
        Ok(id)
    }

    fn new_cell(&mut self) -> ContainerId {
        let id = ContainerId(self.containers.len());
        self.containers.push(ContainerNode {
            kind: ContainerKind::TableCell,
            blocks: Vec::new(),
        });
        id
    }

    /// Cell container at `row`, `col`
    pub fn cell(&self, table: TableId, row: usize, col: usize) -> Result<ContainerId> {
        self.tables
            .get(table.0)
            .and_then(|t| t.rows.get(row))
            .and_then(|r| r.get(col))
            .copied()
            .ok_or_else(|| {
                AppError::invalid_structure(format!("no cell ({}, {}) in table {}", row, col, table.0))
            })
    }

    /// Blocks of a container in document order
    pub fn blocks(&self, container: ContainerId) -> Result<&[Block]> {
        Ok(&self.container(container)?.blocks)
    }

    /// Convert to the nested serializable form
    pub fn to_def(&self) -> Result<DocumentDef> {
        Ok(DocumentDef {
            styles: self.styles.as_ref().map(|s| s.iter().cloned().collect()),
            body: self.blocks_to_def(self.root())?,
        })
    }

    fn blocks_to_def(&self, container: ContainerId) -> Result<Vec<BlockDef>> {
        let mut out = Vec::new();
        for block in self.blocks(container)? {
            match *block {
                Block::Paragraph(p) => {
                    let node = self.paragraph(p)?;
                    out.push(BlockDef::Paragraph {
                        text: node.text.clone(),
                        style: node.style.clone(),
                    });
                }
                Block::Table(t) => {
                    let table = self.tables.get(t.0).ok_or_else(|| {
                        AppError::invalid_structure(format!("unknown table {}", t.0))
                    })?;
                    let mut rows = Vec::new();
                    for row in &table.rows {
                        let mut cells = Vec::new();
                        for cell in row {
                            cells.push(self.blocks_to_def(*cell)?);
                        }
                        rows.push(cells);
                    }
                    out.push(BlockDef::Table { rows });
                }
            }
        }
        Ok(out)
    }

    /// Build from the nested serializable form
    pub fn from_def(def: DocumentDef) -> Result<Self> {
        let mut doc = Document::new();
        if let Some(styles) = def.styles {
            doc = doc.with_styles(styles);
        }
        let root = doc.root();
        doc.fill_from_def(root, def.body)?;
        Ok(doc)
    }

    fn fill_from_def(&mut self, container: ContainerId, blocks: Vec<BlockDef>) -> Result<()> {
        for block in blocks {
            match block {
                BlockDef::Paragraph { text, style } => {
                    self.push_paragraph(container, text, style.as_deref())?;
                }
                BlockDef::Table { rows } => {
                    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
                    if rows.iter().any(|r| r.len() != width) {
                        return Err(AppError::invalid_structure("table rows differ in length"));
                    }
                    let table = self.push_table(container, rows.len(), width)?;
                    for (r, row) in rows.into_iter().enumerate() {
                        for (c, cell_blocks) in row.into_iter().enumerate() {
                            let cell = self.cell(table, r, c)?;
                            self.fill_from_def(cell, cell_blocks)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl DocumentStructure for Document {
    fn root(&self) -> ContainerId {
        ContainerId(0)
    }

    fn container_kind(&self, container: ContainerId) -> Result<ContainerKind> {
        Ok(self.container(container)?.kind)
    }

    fn paragraphs(&self, container: ContainerId) -> Result<Vec<ParagraphId>> {
        Ok(self
            .blocks(container)?
            .iter()
            .filter_map(|b| match b {
                Block::Paragraph(p) => Some(*p),
                Block::Table(_) => None,
            })
            .collect())
    }

    fn tables(&self, container: ContainerId) -> Result<Vec<TableId>> {
        Ok(self
            .blocks(container)?
            .iter()
            .filter_map(|b| match b {
                Block::Table(t) => Some(*t),
                Block::Paragraph(_) => None,
            })
            .collect())
    }

    fn cells(&self, table: TableId) -> Result<Vec<ContainerId>> {
        let node = self
            .tables
            .get(table.0)
            .ok_or_else(|| AppError::invalid_structure(format!("unknown table {}", table.0)))?;
        Ok(node.rows.iter().flatten().copied().collect())
    }

    fn parent(&self, paragraph: ParagraphId) -> Result<ContainerId> {
        Ok(self.paragraph(paragraph)?.parent)
    }

    fn text(&self, paragraph: ParagraphId) -> Result<String> {
        Ok(self.paragraph(paragraph)?.text.clone())
    }

    fn set_text(&mut self, paragraph: ParagraphId, text: &str) -> Result<()> {
        self.paragraph_mut(paragraph)?.text = text.to_string();
        Ok(())
    }

    fn style(&self, paragraph: ParagraphId) -> Result<Option<String>> {
        Ok(self.paragraph(paragraph)?.style.clone())
    }

    fn set_style(&mut self, paragraph: ParagraphId, style: Option<&str>) -> Result<()> {
        if let Some(style) = style {
            self.check_style(style)?;
        }
        self.paragraph_mut(paragraph)?.style = style.map(str::to_string);
        Ok(())
    }

    fn insert_paragraph_after(&mut self, anchor: ParagraphId, text: &str) -> Result<ParagraphId> {
        let parent = self.paragraph(anchor)?.parent;
        let position = self
            .blocks(parent)?
            .iter()
            .position(|b| *b == Block::Paragraph(anchor))
            .ok_or_else(|| {
                AppError::invalid_structure(format!("paragraph {} detached from parent", anchor.0))
            })?;

        let id = ParagraphId(self.paragraphs.len());
        self.paragraphs.push(ParagraphNode {
            text: text.to_string(),
            style: None,
            parent,
        });
        self.container_mut(parent)?
            .blocks
            .insert(position + 1, Block::Paragraph(id));
        Ok(id)
    }
}

/// Serializable nested form of a [`Document`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<Vec<String>>,
    #[serde(default)]
    pub body: Vec<BlockDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDef {
    Paragraph {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<String>,
    },
    /// Rows of cells; each cell is a list of blocks
    Table { rows: Vec<Vec<Vec<BlockDef>>> },
}
