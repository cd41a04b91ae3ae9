//! Splits sanitized markdown into heading and paragraph pieces.
//!
//! A heading line is a piece of its own. Content is grouped into paragraphs
//! separated by blank lines; a fenced code block is kept whole inside the
//! paragraph it opens and never yields headings.

use folio_artifacts::VecSuggestions;
use folio_markdown::is_heading;
use folio_shared::VectorStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceKind {
    Heading,
    Content,
}

/// A contiguous block of the sanitized document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub kind: PieceKind,
    /// 1-based line of the first line of the piece.
    pub first_line: usize,
    pub text: String,
}

impl Piece {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Split `markdown` into pieces in document order.
pub fn split(markdown: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut current: Option<(usize, Vec<&str>)> = None;
    let mut in_fence = false;

    for (idx, line) in markdown.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim_start();
        let fence = trimmed.starts_with("```") || trimmed.starts_with("~~~");

        if in_fence {
            if let Some((_, lines)) = current.as_mut() {
                lines.push(line);
            }
            in_fence = !fence;
            continue;
        }

        if fence {
            in_fence = true;
            current.get_or_insert_with(|| (line_no, Vec::new())).1.push(line);
            continue;
        }

        if line.trim().is_empty() {
            flush(&mut current, &mut pieces);
            continue;
        }

        if is_heading(line) {
            flush(&mut current, &mut pieces);
            pieces.push(Piece {
                kind: PieceKind::Heading,
                first_line: line_no,
                text: line.trim_end().to_string(),
            });
            continue;
        }

        current.get_or_insert_with(|| (line_no, Vec::new())).1.push(line);
    }
    flush(&mut current, &mut pieces);

    pieces
}

fn flush(current: &mut Option<(usize, Vec<&str>)>, pieces: &mut Vec<Piece>) {
    if let Some((first_line, lines)) = current.take() {
        pieces.push(Piece {
            kind: PieceKind::Content,
            first_line,
            text: lines.join("\n"),
        });
    }
}

/// First lines of content pieces with at least `min_words` words.
pub fn suggest_lines(markdown: &str, min_words: usize) -> Vec<usize> {
    split(markdown)
        .into_iter()
        .filter(|p| p.kind == PieceKind::Content && p.word_count() >= min_words)
        .map(|p| p.first_line)
        .collect()
}

/// Initial vector status of a piece.
///
/// Headings and parentless content are never scheduled. With suggestions,
/// content is scheduled iff its first line was suggested; otherwise by word count.
pub fn schedule(
    piece: &Piece,
    has_parent: bool,
    min_words: usize,
    suggestions: Option<&VecSuggestions>,
) -> VectorStatus {
    if piece.kind == PieceKind::Heading || !has_parent {
        return VectorStatus::NoVec;
    }
    let wanted = match suggestions {
        Some(s) => s.contains(piece.first_line),
        None => piece.word_count() >= min_words,
    };
    if wanted {
        VectorStatus::ToVec
    } else {
        VectorStatus::NoVec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "Preamble words here.\n\n# One\n\nFirst paragraph\nstill first.\n\nSecond.\n## Two\n```\n# code\n\nmore code\n```\n\n";

    #[test]
    fn splits_headings_and_paragraphs() {
        let pieces = split(DOC);
        let shape: Vec<(PieceKind, usize)> = pieces.iter().map(|p| (p.kind, p.first_line)).collect();
        assert_eq!(
            shape,
            vec![
                (PieceKind::Content, 1),
                (PieceKind::Heading, 3),
                (PieceKind::Content, 5),
                (PieceKind::Content, 8),
                (PieceKind::Heading, 9),
                (PieceKind::Content, 10),
            ]
        );
        assert_eq!(pieces[2].text, "First paragraph\nstill first.");
        assert_eq!(pieces[1].text, "# One");
    }

    #[test]
    fn code_fence_stays_in_one_piece() {
        let pieces = split(DOC);
        let code = pieces.last().unwrap();
        assert_eq!(code.text, "```\n# code\n\nmore code\n```");
        assert!(pieces.iter().all(|p| p.text != "# code"));
    }

    #[test]
    fn suggestions_use_first_lines_of_long_paragraphs() {
        assert_eq!(suggest_lines(DOC, 3), vec![1, 5, 10]);
        assert_eq!(suggest_lines(DOC, 1), vec![1, 5, 8, 10]);
        assert!(suggest_lines("", 1).is_empty());
    }

    #[test]
    fn scheduling_rules() {
        let pieces = split(DOC);
        let heading = &pieces[1];
        let long = &pieces[2];
        let short = &pieces[3];

        assert_eq!(schedule(heading, true, 1, None), VectorStatus::NoVec);
        assert_eq!(schedule(long, false, 1, None), VectorStatus::NoVec);
        assert_eq!(schedule(long, true, 4, None), VectorStatus::ToVec);
        assert_eq!(schedule(short, true, 4, None), VectorStatus::NoVec);

        let suggestions = VecSuggestions::new("h", [8]);
        assert_eq!(schedule(long, true, 1, Some(&suggestions)), VectorStatus::NoVec);
        assert_eq!(schedule(short, true, 100, Some(&suggestions)), VectorStatus::ToVec);
    }
}
