//! Source-to-markdown conversion.
//!
//! Richer formats (PDF, EPUB) are handled by external converters implementing
//! [`SourceConverter`]. The built-in converter covers markdown/text pass-through
//! and HTML via `htmd`, followed by light cleanup passes.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use folio_shared::{FolioError, Result};

/// Turns a source file into markdown text.
pub trait SourceConverter {
    fn convert(&self, source: &Path) -> Result<String>;
}

/// Converter for `.md`, `.markdown`, `.txt`, `.html`, and `.htm` sources.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinConverter;

impl SourceConverter for BuiltinConverter {
    #[instrument(skip(self), fields(source = %source.display()))]
    fn convert(&self, source: &Path) -> Result<String> {
        let extension = source
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let raw = std::fs::read_to_string(source).map_err(|e| FolioError::io(source, e))?;

        let markdown = match extension.as_str() {
            "md" | "markdown" | "txt" => raw,
            "html" | "htm" => html_to_markdown(&raw)?,
            other => {
                return Err(FolioError::Conversion(format!(
                    "no built-in converter for `.{other}` sources ({})",
                    source.display()
                )));
            }
        };

        let cleaned = cleanup(&markdown);
        debug!(bytes = cleaned.len(), "conversion complete");
        Ok(cleaned)
    }
}

/// Convert an HTML document to markdown.
pub fn html_to_markdown(html: &str) -> Result<String> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
        .build();

    converter
        .convert(html)
        .map_err(|e| FolioError::Conversion(format!("htmd conversion failed: {e}")))
}

/// Normalize line endings and whitespace so line numbers are stable downstream.
fn cleanup(md: &str) -> String {
    let result = normalize_whitespace(md);
    let result = clean_blank_lines(&result);
    ensure_trailing_newline(&result)
}

/// Trim trailing whitespace on every line (this also drops `\r`).
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of 3+ blank lines into exactly 2.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n\n").to_string()
}

/// Ensure the text ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}
