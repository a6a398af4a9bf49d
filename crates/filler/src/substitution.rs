//! Substitution of generated text back into a document

use docfill_common::document::{DocumentStructure, ParagraphId};
use docfill_common::errors::Result;
use regex_lite::Regex;
use std::sync::OnceLock;
use tracing::debug;

fn blank_line() -> &'static Regex {
    static BLANK: OnceLock<Regex> = OnceLock::new();
    BLANK.get_or_init(|| Regex::new(r"\n\s*\n").expect("blank line pattern is valid"))
}

/// Split generated text into trimmed, non-empty paragraph blocks
pub fn split_blocks(text: &str) -> Vec<String> {
    blank_line()
        .split(text)
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rewrite `paragraph` with `text`.
///
/// The first block replaces the paragraph's text in place; each further
/// block becomes a new paragraph right after the previous one. Empty text
/// leaves the document untouched. Returns the paragraphs now holding the
/// generated content.
pub fn substitute<D: DocumentStructure + ?Sized>(
    doc: &mut D,
    paragraph: ParagraphId,
    text: &str,
) -> Result<Vec<ParagraphId>> {
    let blocks = split_blocks(text);
    let Some((first, rest)) = blocks.split_first() else {
        return Ok(Vec::new());
    };

    doc.set_text(paragraph, first)?;

    let style = doc.style(paragraph)?;
    let mut written = Vec::with_capacity(blocks.len());
    written.push(paragraph);

    let mut last = paragraph;
    for block in rest {
        last = doc.insert_paragraph_after(last, block)?;
        if let Some(style) = style.as_deref() {
            if let Err(e) = doc.set_style(last, Some(style)) {
                debug!(style, error = %e, "Style copy skipped");
            }
        }
        written.push(last);
    }

    Ok(written)
}
