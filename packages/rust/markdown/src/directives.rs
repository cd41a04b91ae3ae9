//! Heading-change directives and the two textual dialects that produce them.
//!
//! Both dialects parse into the same [`DirectiveSet`]; the applier in
//! [`crate::apply`] does not know which syntax a set came from.
//!
//! **Keyword dialect** (markdown-aware): directives live inside a fenced code block,
//! one per line, shaped `N: NO_CHANGE | REMOVE | H1..H4`.
//!
//! **Sentinel dialect** (free text): one `N: value` per line, where value is
//! `***MISSING***` (skip), `-` (strip markers), `--` (blank the line), or literal
//! replacement text.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use folio_shared::{FolioError, Result};

/// What to do with one source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Keep the line.
    NoChange,
    /// Strip leading `#` markers and the whitespace after them.
    RemoveMarkers,
    /// Rewrite the marker run to this many `#` (1..=4).
    SetLevel(u8),
    /// Replace the line with an empty line.
    Blank,
    /// Explicitly keep the original line.
    Skip,
    /// Replace the line's content with this text.
    Literal(String),
}

/// One line-indexed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// 1-based source line.
    pub line: usize,
    pub action: Action,
}

/// Which textual syntax a directive document is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Fenced block of `N: NO_CHANGE|REMOVE|H1..H4`.
    Keyword,
    /// Free-text `N: value` lines with sentinel tokens.
    Sentinel,
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "keyword" => Ok(Self::Keyword),
            "b" | "sentinel" => Ok(Self::Sentinel),
            other => Err(format!("unknown directive dialect: {other} (expected a or b)")),
        }
    }
}

/// Directives keyed by line number. Inserting a line twice keeps the later action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveSet {
    actions: BTreeMap<usize, Action>,
}

impl DirectiveSet {
    pub fn from_directives(directives: impl IntoIterator<Item = Directive>) -> Self {
        let mut set = Self::default();
        for directive in directives {
            set.insert(directive);
        }
        set
    }

    pub fn insert(&mut self, directive: Directive) {
        if let Some(previous) = self.actions.insert(directive.line, directive.action) {
            debug!(line = directive.line, ?previous, "duplicate directive, later one wins");
        }
    }

    pub fn get(&self, line: usize) -> Option<&Action> {
        self.actions.get(&line)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Directives in ascending line order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Action)> {
        self.actions.iter().map(|(line, action)| (*line, action))
    }
}

/// Parse a directive document in the given dialect.
pub fn parse(text: &str, dialect: Dialect) -> Result<DirectiveSet> {
    let directives = match dialect {
        Dialect::Keyword => parse_keyword(text)?,
        Dialect::Sentinel => parse_sentinel(text)?,
    };
    Ok(DirectiveSet::from_directives(directives))
}

// ---------------------------------------------------------------------------
// Keyword dialect
// ---------------------------------------------------------------------------

/// Parse keyword directives from every fenced block in `text`, in document order.
///
/// Fails if the document has no fence at all. An unterminated fence runs to the end.
pub fn parse_keyword(text: &str) -> Result<Vec<Directive>> {
    static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^\s*(\d+)\s*:\s*(NO_CHANGE|REMOVE|H[1-4])\s*$").expect("valid regex")
    });

    let mut directives = Vec::new();
    let mut in_fence = false;
    let mut saw_fence = false;

    for raw in text.lines() {
        let trimmed = raw.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            saw_fence = true;
            continue;
        }
        if !in_fence {
            continue;
        }

        let Some(caps) = KEYWORD_RE.captures(raw) else {
            continue;
        };
        let line = parse_line_number(&caps[1])?;
        let action = match &caps[2] {
            "NO_CHANGE" => Action::NoChange,
            "REMOVE" => Action::RemoveMarkers,
            level => Action::SetLevel(level[1..].parse().unwrap_or(1)),
        };
        directives.push(Directive { line, action });
    }

    if !saw_fence {
        return Err(FolioError::malformed(
            "no fenced code block with heading directives found",
        ));
    }

    debug!(count = directives.len(), "parsed keyword directives");
    Ok(directives)
}

// ---------------------------------------------------------------------------
// Sentinel dialect
// ---------------------------------------------------------------------------

/// Sentinel meaning "leave this line alone".
pub const MISSING_SENTINEL: &str = "***MISSING***";

/// Parse sentinel directives, one `N: value` per line, in document order.
///
/// Lines of any other shape are ignored. A non-blank document that yields no
/// directive at all is rejected.
pub fn parse_sentinel(text: &str) -> Result<Vec<Directive>> {
    static SENTINEL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*:(.*)$").expect("valid regex"));

    let mut directives = Vec::new();

    for raw in text.lines() {
        let Some(caps) = SENTINEL_RE.captures(raw) else {
            continue;
        };
        let value = caps[2].trim_start().trim_end_matches('\r');
        if value.trim().is_empty() {
            debug!(line = %&caps[1], "ignoring directive with empty value");
            continue;
        }
        let line = parse_line_number(&caps[1])?;
        let action = match value.trim_end() {
            MISSING_SENTINEL => Action::Skip,
            "-" => Action::RemoveMarkers,
            "--" => Action::Blank,
            _ => Action::Literal(value.to_string()),
        };
        directives.push(Directive { line, action });
    }

    if directives.is_empty() && !text.trim().is_empty() {
        return Err(FolioError::malformed("no `line: value` directives found"));
    }

    debug!(count = directives.len(), "parsed sentinel directives");
    Ok(directives)
}

fn parse_line_number(digits: &str) -> Result<usize> {
    match digits.parse::<usize>() {
        Ok(0) => Err(FolioError::malformed("line numbers start at 1, got 0")),
        Ok(n) => Ok(n),
        Err(_) => Err(FolioError::malformed(format!("line number out of range: {digits}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_block_parses_all_actions() {
        let doc = "Here are the changes:\n\n```\n1: NO_CHANGE\n  7 : H1\n9:REMOVE\n12: H4  \n```\n";
        let directives = parse_keyword(doc).unwrap();
        assert_eq!(
            directives,
            vec![
                Directive { line: 1, action: Action::NoChange },
                Directive { line: 7, action: Action::SetLevel(1) },
                Directive { line: 9, action: Action::RemoveMarkers },
                Directive { line: 12, action: Action::SetLevel(4) },
            ]
        );
    }

    #[test]
    fn keyword_ignores_lines_outside_fence_and_unknown_actions() {
        let doc = "3: H2\n```text\n4: H5\n5: h2\nnoise\n6: H3\n```\n8: H1\n";
        let directives = parse_keyword(doc).unwrap();
        assert_eq!(directives, vec![Directive { line: 6, action: Action::SetLevel(3) }]);
    }

    #[test]
    fn keyword_without_fence_is_malformed() {
        let err = parse_keyword("7: H1\n8: REMOVE\n").unwrap_err();
        assert!(matches!(err, FolioError::MalformedDirectives { .. }));
    }

    #[test]
    fn keyword_empty_fence_is_empty_set() {
        assert!(parse("```\n```\n", Dialect::Keyword).unwrap().is_empty());
    }

    #[test]
    fn keyword_unterminated_fence_runs_to_end() {
        let directives = parse_keyword("```\n2: H2\n").unwrap();
        assert_eq!(directives.len(), 1);
    }

    #[test]
    fn line_zero_is_malformed() {
        assert!(parse_keyword("```\n0: H1\n```").is_err());
        assert!(parse_sentinel("0: -").is_err());
    }

    #[test]
    fn sentinel_values() {
        let doc = "3: -\n4: --\n5: ***MISSING***\n6: # New Name\n7:   ## Spaced  \r\n";
        let directives = parse_sentinel(doc).unwrap();
        assert_eq!(
            directives,
            vec![
                Directive { line: 3, action: Action::RemoveMarkers },
                Directive { line: 4, action: Action::Blank },
                Directive { line: 5, action: Action::Skip },
                Directive { line: 6, action: Action::Literal("# New Name".into()) },
                Directive { line: 7, action: Action::Literal("## Spaced  ".into()) },
            ]
        );
    }

    #[test]
    fn sentinel_ignores_noise_but_rejects_all_noise() {
        let directives = parse_sentinel("heading fixes\n\n10: --\nnot a directive\n").unwrap();
        assert_eq!(directives.len(), 1);

        assert!(parse_sentinel("").unwrap().is_empty());
        assert!(matches!(
            parse_sentinel("nothing useful here\n"),
            Err(FolioError::MalformedDirectives { .. })
        ));
    }

    #[test]
    fn duplicate_line_last_wins() {
        let set = parse("```\n7: H1\n7: REMOVE\n```", Dialect::Keyword).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(7), Some(&Action::RemoveMarkers));

        let set = parse("3: -\n3: # Final", Dialect::Sentinel).unwrap();
        assert_eq!(set.get(3), Some(&Action::Literal("# Final".into())));
    }

    #[test]
    fn dialect_from_str() {
        assert_eq!("a".parse::<Dialect>(), Ok(Dialect::Keyword));
        assert_eq!("B".parse::<Dialect>(), Ok(Dialect::Sentinel));
        assert!("c".parse::<Dialect>().is_err());
    }
}
