//! Heading extraction: the line-numbered titles listing and the structured TOC.
//!
//! Lines inside fenced code blocks are never treated as headings here.

use folio_shared::{Toc, TocEntry};

use crate::apply::is_heading;

/// A heading found in a markdown document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading<'a> {
    /// 1-based line number.
    pub line: usize,
    pub level: u8,
    /// Text after the markers.
    pub text: &'a str,
    /// The full source line.
    pub raw: &'a str,
}

/// Every heading outside code fences, in document order.
pub fn headings(markdown: &str) -> Vec<Heading<'_>> {
    let mut found = Vec::new();
    let mut in_fence = false;

    for (idx, raw) in markdown.lines().enumerate() {
        let trimmed = raw.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || !is_heading(raw) {
            continue;
        }

        let markers = raw.len() - raw.trim_start_matches('#').len();
        found.push(Heading {
            line: idx + 1,
            level: u8::try_from(markers).unwrap_or(u8::MAX),
            text: raw[markers..].trim(),
            raw,
        });
    }

    found
}

/// Render the titles document: one `N: <heading line>` per heading.
///
/// This is the text heading-change suggestions are produced from, so its line
/// numbers are the source document's line numbers.
pub fn list_headings(markdown: &str) -> String {
    headings(markdown)
        .iter()
        .map(|h| format!("{}: {}\n", h.line, h.raw))
        .collect()
}

/// Build a nested TOC from heading levels.
pub fn build_toc(markdown: &str) -> Toc {
    // Stack of open entries; each is a child of the one below it.
    let mut stack: Vec<TocEntry> = Vec::new();
    let mut sections = Vec::new();

    for heading in headings(markdown) {
        let entry = TocEntry {
            title: heading.text.to_string(),
            level: heading.level,
            line: heading.line,
            children: Vec::new(),
        };

        while stack.last().is_some_and(|open| open.level >= entry.level) {
            close_top(&mut stack, &mut sections);
        }
        stack.push(entry);
    }
    while !stack.is_empty() {
        close_top(&mut stack, &mut sections);
    }

    Toc { sections }
}

fn close_top(stack: &mut Vec<TocEntry>, sections: &mut Vec<TocEntry>) {
    if let Some(done) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(done),
            None => sections.push(done),
        }
    }
}
