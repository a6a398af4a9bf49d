//! Placeholder extraction
//!
//! Walks a document depth-first (a container's own paragraphs, then the
//! cells of its tables, row-major) and collects `<token>` occurrences
//! together with the structural context of the paragraph holding them.

use docfill_common::document::{ContainerId, ContainerKind, DocumentStructure, ParagraphId};
use docfill_common::errors::{AppError, Result};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Where a placeholder sits; drives generation verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderContext {
    Table,
    Section,
}

impl PlaceholderContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceholderContext::Table => "table",
            PlaceholderContext::Section => "section",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Text between the angle brackets
    pub token: String,
    pub context: PlaceholderContext,
    pub paragraph: ParagraphId,
}

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<(.*?)>").expect("placeholder pattern is valid"))
}

/// All tokens in a piece of text, in order of appearance
pub fn tokens_in(text: &str) -> Vec<String> {
    pattern()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Every paragraph of the document in depth-first order.
///
/// Uses an explicit stack so nesting depth is bounded only by the tree. A
/// container reachable twice means the tree is malformed.
pub fn paragraphs_in_order<D: DocumentStructure + ?Sized>(doc: &D) -> Result<Vec<ParagraphId>> {
    let mut ordered = Vec::new();
    let mut visited: HashSet<ContainerId> = HashSet::new();
    let mut stack = vec![doc.root()];

    while let Some(container) = stack.pop() {
        if !visited.insert(container) {
            return Err(AppError::invalid_structure(format!(
                "container {} reached twice during traversal",
                container.0
            )));
        }

        ordered.extend(doc.paragraphs(container)?);

        let mut cells = Vec::new();
        for table in doc.tables(container)? {
            cells.extend(doc.cells(table)?);
        }
        stack.extend(cells.into_iter().rev());
    }

    Ok(ordered)
}

/// Context of a paragraph from its immediate container
pub fn context_of<D: DocumentStructure + ?Sized>(doc: &D, paragraph: ParagraphId) -> Result<PlaceholderContext> {
    let parent = doc.parent(paragraph)?;
    Ok(match doc.container_kind(parent)? {
        ContainerKind::TableCell => PlaceholderContext::Table,
        ContainerKind::Body => PlaceholderContext::Section,
    })
}

/// Every placeholder occurrence in document order
pub fn extract_placeholders<D: DocumentStructure + ?Sized>(doc: &D) -> Result<Vec<Placeholder>> {
    let mut found = Vec::new();
    for paragraph in paragraphs_in_order(doc)? {
        let tokens = tokens_in(&doc.text(paragraph)?);
        if tokens.is_empty() {
            continue;
        }
        let context = context_of(doc, paragraph)?;
        found.extend(tokens.into_iter().map(|token| Placeholder {
            token,
            context,
            paragraph,
        }));
    }
    Ok(found)
}

/// The placeholder resolved for each paragraph: only the first token of a
/// paragraph is filled, the rest of its tokens are left as they are.
pub fn resolvable_placeholders<D: DocumentStructure + ?Sized>(doc: &D) -> Result<Vec<Placeholder>> {
    let mut seen = HashSet::new();
    Ok(extract_placeholders(doc)?
        .into_iter()
        .filter(|p| seen.insert(p.paragraph))
        .collect())
}
