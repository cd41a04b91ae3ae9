//! Markdown handling for folio: the heading edit language, heading extraction,
//! and source conversion.
//!
//! The edit language is a compact, line-indexed way of correcting the heading
//! hierarchy of extracted markdown. Two textual dialects ([`Dialect::Keyword`]
//! and [`Dialect::Sentinel`]) parse into one [`DirectiveSet`], which [`apply`]
//! turns into the sanitized document without ever changing its line count.

pub mod apply;
mod convert;
pub mod directives;
mod headings;

pub use apply::{Applied, apply, apply_line, is_heading};
pub use convert::{BuiltinConverter, SourceConverter, html_to_markdown};
pub use directives::{Action, Dialect, Directive, DirectiveSet, parse, parse_keyword, parse_sentinel};
pub use headings::{Heading, build_toc, headings, list_headings};

use folio_shared::Result;

/// Parse `directive_doc` in `dialect` and apply it to `source`.
///
/// Nothing is produced if the directive document is malformed.
pub fn sanitize(source: &str, directive_doc: &str, dialect: Dialect) -> Result<Applied> {
    let directives = parse(directive_doc, dialect)?;
    Ok(apply(source, &directives))
}
