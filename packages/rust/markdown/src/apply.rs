//! Applies a [`DirectiveSet`] to a markdown document, line by line.
//!
//! The output always has exactly as many lines as the input, and each line keeps
//! its original terminator (`\n`, `\r\n`, or none on the last line). A last
//! line emptied by a directive is written as `\n` so it is not lost.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use crate::directives::{Action, DirectiveSet};

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#+\s+.+$").expect("valid regex"));

/// Whether `line` (without terminator) is an ATX heading.
pub fn is_heading(line: &str) -> bool {
    HEADING_RE.is_match(line)
}

/// Result of applying directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub text: String,
    /// Lines whose content differs from the source.
    pub changed: usize,
    /// Directive line numbers past the end of the source.
    pub out_of_range: Vec<usize>,
}

/// Apply `directives` to `source`. Lines without a directive are copied unchanged.
#[instrument(skip_all, fields(directives = directives.len(), bytes = source.len()))]
pub fn apply(source: &str, directives: &DirectiveSet) -> Applied {
    let mut text = String::with_capacity(source.len());
    let mut changed = 0;
    let mut line_count = 0;

    for (idx, segment) in source.split_inclusive('\n').enumerate() {
        line_count = idx + 1;
        let (body, terminator) = split_terminator(segment);

        let replaced = match directives.get(line_count) {
            Some(action) => apply_line(body, action),
            None => Cow::Borrowed(body),
        };
        if replaced != body {
            changed += 1;
        }

        text.push_str(&replaced);
        if replaced.is_empty() && terminator.is_empty() {
            // An emptied final line needs a terminator to stay a line.
            text.push('\n');
        } else {
            text.push_str(terminator);
        }
    }

    let out_of_range: Vec<usize> = directives
        .iter()
        .map(|(line, _)| line)
        .filter(|line| *line > line_count)
        .collect();
    if !out_of_range.is_empty() {
        debug!(?out_of_range, line_count, "directives past end of document ignored");
    }

    Applied {
        text,
        changed,
        out_of_range,
    }
}

/// Apply one action to one line body.
pub fn apply_line<'a>(line: &'a str, action: &Action) -> Cow<'a, str> {
    match action {
        Action::NoChange | Action::Skip => Cow::Borrowed(line),
        Action::Blank => Cow::Borrowed(""),
        Action::Literal(text) => {
            if text.contains(['\n', '\r']) {
                Cow::Owned(text.replace(['\r', '\n'], " "))
            } else {
                Cow::Owned(text.clone())
            }
        }
        Action::RemoveMarkers if is_heading(line) => {
            Cow::Borrowed(line.trim_start_matches('#').trim_start())
        }
        Action::SetLevel(level) if is_heading(line) => {
            let rest = line.trim_start_matches('#');
            let level = usize::from((*level).clamp(1, 4));
            Cow::Owned(format!("{}{rest}", "#".repeat(level)))
        }
        Action::RemoveMarkers | Action::SetLevel(_) => Cow::Borrowed(line),
    }
}

fn split_terminator(segment: &str) -> (&str, &str) {
    if let Some(body) = segment.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = segment.strip_suffix('\n') {
        (body, "\n")
    } else {
        (segment, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::{Dialect, Directive, parse};

    const BOOK: &str = "Preface text\n\
                        \n\
                        ## Section\n\
                        \n\
                        Body paragraph.\n\
                        \n\
                        ### Old Title\n\
                        More body.\n";

    fn set(line: usize, action: Action) -> DirectiveSet {
        DirectiveSet::from_directives([Directive { line, action }])
    }

    fn line(text: &str, n: usize) -> &str {
        text.split('\n').nth(n - 1).unwrap()
    }

    #[test]
    fn keyword_examples() {
        let out = apply(BOOK, &parse("```\n7: H1\n```", Dialect::Keyword).unwrap());
        assert_eq!(line(&out.text, 7), "# Old Title");
        assert_eq!(out.changed, 1);

        let out = apply(BOOK, &parse("```\n7: REMOVE\n```", Dialect::Keyword).unwrap());
        assert_eq!(line(&out.text, 7), "Old Title");

        let out = apply(BOOK, &parse("```\n3: H4\n```", Dialect::Keyword).unwrap());
        assert_eq!(line(&out.text, 3), "#### Section");
    }

    #[test]
    fn sentinel_examples() {
        let cases = [
            ("3: -", "Section"),
            ("3: --", ""),
            ("3: ***MISSING***", "## Section"),
            ("3: # New Name", "# New Name"),
        ];
        for (doc, expected) in cases {
            let out = apply(BOOK, &parse(doc, Dialect::Sentinel).unwrap());
            assert_eq!(line(&out.text, 3), expected, "directive {doc}");
        }
    }

    #[test]
    fn heading_actions_are_noops_on_plain_lines() {
        for action in [Action::RemoveMarkers, Action::SetLevel(2)] {
            let out = apply(BOOK, &set(5, action));
            assert_eq!(out.text, BOOK);
            assert_eq!(out.changed, 0);
        }
        // `#hashtag` has no space after the markers, so it is not a heading.
        assert_eq!(apply_line("#hashtag", &Action::RemoveMarkers), "#hashtag");
    }

    #[test]
    fn blank_and_literal_apply_to_any_line() {
        let out = apply(BOOK, &set(1, Action::Blank));
        assert_eq!(line(&out.text, 1), "");
        let out = apply(BOOK, &set(5, Action::Literal("Replaced.".into())));
        assert_eq!(line(&out.text, 5), "Replaced.");
    }

    #[test]
    fn line_count_is_preserved() {
        let sources = [BOOK, "", "no newline at end", "a\r\nb\r\n", "\n\n\n", "# x\n"];
        let directive_sets = [
            set(1, Action::Blank),
            set(2, Action::Literal("multi\nline".into())),
            set(1, Action::RemoveMarkers),
            set(99, Action::Blank),
            parse("1: --\n2: --\n3: --\n4: --", Dialect::Sentinel).unwrap(),
        ];
        for source in sources {
            for directives in &directive_sets {
                let out = apply(source, directives);
                assert_eq!(
                    out.text.split_inclusive('\n').count(),
                    source.split_inclusive('\n').count(),
                    "source {source:?}"
                );
            }
        }
    }

    #[test]
    fn emptied_last_line_without_newline_survives() {
        let out = apply("no newline at end", &set(1, Action::Blank));
        assert_eq!(out.text, "\n");
        assert_eq!(out.changed, 1);

        let out = apply("## A\n#  ", &set(2, Action::RemoveMarkers));
        assert_eq!(out.text, "## A\n\n");
        assert_eq!(out.text.split_inclusive('\n').count(), 2);

        let out = apply("a\nb", &set(2, Action::Literal(String::new())));
        assert_eq!(out.text, "a\n\n");
    }

    #[test]
    fn no_change_everywhere_is_identity() {
        let source = "# A\r\n\r\n## B\ntext\n### C";
        let all_no_change =
            DirectiveSet::from_directives((1..=5).map(|line| Directive { line, action: Action::NoChange }));
        assert_eq!(apply(source, &all_no_change).text, source);
        assert_eq!(apply(source, &DirectiveSet::default()).text, source);
    }

    #[test]
    fn terminators_are_kept_per_line() {
        let out = apply("## A\r\n## B\n## C", &parse("1: -\n2: -\n3: -", Dialect::Sentinel).unwrap());
        assert_eq!(out.text, "A\r\nB\nC");
    }

    #[test]
    fn last_directive_wins_when_applied() {
        let directives = parse("```\n7: H1\n7: REMOVE\n```", Dialect::Keyword).unwrap();
        assert_eq!(line(&apply(BOOK, &directives).text, 7), "Old Title");

        let directives = parse("```\n7: REMOVE\n7: H1\n```", Dialect::Keyword).unwrap();
        assert_eq!(line(&apply(BOOK, &directives).text, 7), "# Old Title");
    }

    #[test]
    fn out_of_range_directives_are_reported() {
        let out = apply(BOOK, &set(42, Action::Blank));
        assert_eq!(out.out_of_range, vec![42]);
        assert_eq!(out.text, BOOK);
    }
}
