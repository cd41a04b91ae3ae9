//! Core domain types for tracked documents, their artifacts, and chunks.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// DocId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for document identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub Uuid);

impl DocId {
    /// Generate a new time-sortable document identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DocId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DocId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// ArtifactKey
// ---------------------------------------------------------------------------

/// Pipeline-stage keys recognized by the artifact registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKey {
    OriginalFile,
    HierMarkdown,
    StyleMarkdown,
    OriginalMarkdown,
    TocTitles,
    Titles,
    SanMapping,
    Sanitized,
    SanitizedTitles,
    VecSuggestions,
}

impl ArtifactKey {
    /// Every recognized key, in pipeline order.
    pub const ALL: [ArtifactKey; 10] = [
        Self::OriginalFile,
        Self::HierMarkdown,
        Self::StyleMarkdown,
        Self::OriginalMarkdown,
        Self::TocTitles,
        Self::Titles,
        Self::SanMapping,
        Self::Sanitized,
        Self::SanitizedTitles,
        Self::VecSuggestions,
    ];

    /// Key as persisted in the artifact map.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OriginalFile => "original_file",
            Self::HierMarkdown => "hier_markdown",
            Self::StyleMarkdown => "style_markdown",
            Self::OriginalMarkdown => "original_markdown",
            Self::TocTitles => "toc_titles",
            Self::Titles => "titles",
            Self::SanMapping => "san_mapping",
            Self::Sanitized => "sanitized",
            Self::SanitizedTitles => "sanitized_titles",
            Self::VecSuggestions => "vec_suggestions",
        }
    }

    /// The `folio` subcommand that produces this artifact.
    pub fn producer(&self) -> &'static str {
        match self {
            Self::OriginalFile => "register",
            Self::HierMarkdown | Self::StyleMarkdown | Self::OriginalMarkdown => "convert",
            Self::TocTitles => "toc-titles",
            Self::Titles => "titles",
            Self::SanMapping => "suggest",
            Self::Sanitized | Self::SanitizedTitles => "sanitize",
            Self::VecSuggestions => "suggest-vec",
        }
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| format!("unknown artifact key: {s}"))
    }
}

// ---------------------------------------------------------------------------
// ArtifactRef / ArtifactMap
// ---------------------------------------------------------------------------

/// A recorded artifact: absolute path plus the hex SHA-256 of its bytes when recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub hash: String,
    /// Hash of the input whose line numbers this artifact refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
}

impl ArtifactRef {
    #[must_use]
    pub fn derived_from(mut self, hash: impl Into<String>) -> Self {
        self.derived_from = Some(hash.into());
        self
    }
}

/// Per-document map from stage key to artifact.
///
/// Treated as an immutable value: updates go through [`ArtifactMap::with_entry`],
/// which returns a new map, so the owning record is always reassigned wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactMap(BTreeMap<ArtifactKey, ArtifactRef>);

impl ArtifactMap {
    pub fn get(&self, key: ArtifactKey) -> Option<&ArtifactRef> {
        self.0.get(&key)
    }

    pub fn contains(&self, key: ArtifactKey) -> bool {
        self.0.contains_key(&key)
    }

    /// Copy of this map with `key` set to `artifact`.
    #[must_use]
    pub fn with_entry(&self, key: ArtifactKey, artifact: ArtifactRef) -> Self {
        let mut next = self.0.clone();
        next.insert(key, artifact);
        Self(next)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArtifactKey, &ArtifactRef)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Toc
// ---------------------------------------------------------------------------

/// A single heading in a document's table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    /// Heading text without markers.
    pub title: String,
    /// Heading level (number of `#`).
    pub level: u8,
    /// 1-based line in the sanitized document.
    pub line: usize,
    /// Nested lower-level headings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TocEntry>,
}

/// Structured table of contents stored on a [`Document`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toc {
    pub sections: Vec<TocEntry>,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// One tracked source work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    /// SHA-256 of the source file at registration. Never rewritten by later stages.
    pub identity_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// File stem every derived artifact name is built from.
    pub stem: String,
    pub artifacts: ArtifactMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toc: Option<Toc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// Vectorization progress of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorStatus {
    /// Not scheduled (default).
    NoVec,
    /// Scheduled for embedding.
    ToVec,
    /// Embedding stored.
    Vec,
    /// Embedding attempt failed.
    VecErr,
}

impl VectorStatus {
    pub const ALL: [VectorStatus; 4] = [Self::NoVec, Self::ToVec, Self::Vec, Self::VecErr];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoVec => "no_vec",
            Self::ToVec => "to_vec",
            Self::Vec => "vec",
            Self::VecErr => "vec_err",
        }
    }
}

impl std::fmt::Display for VectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VectorStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown vector status: {s}"))
    }
}

/// A unit of content derived from a sanitized document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: i64,
    pub work_id: String,
    /// Owning heading chunk; `None` for headings and preamble content.
    pub parent_id: Option<i64>,
    /// 1-based first line of this chunk in the sanitized file.
    pub source_line: usize,
    pub content: String,
    pub vector_status: VectorStatus,
    pub embedding: Option<Vec<f32>>,
}

/// Insert payload for a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    /// Index of the owning heading within the same insert batch.
    pub parent: Option<usize>,
    pub source_line: usize,
    pub content: String,
    pub vector_status: VectorStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_roundtrip() {
        let id = DocId::new();
        let parsed: DocId = id.to_string().parse().expect("parse DocId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn artifact_key_names_match_serde() {
        for key in ArtifactKey::ALL {
            let json = serde_json::to_string(&key).expect("serialize");
            assert_eq!(json, format!("\"{}\"", key.as_str()));
            assert_eq!(key.as_str().parse::<ArtifactKey>(), Ok(key));
        }
        assert!("bogus".parse::<ArtifactKey>().is_err());
    }

    #[test]
    fn with_entry_leaves_original_untouched() {
        let empty = ArtifactMap::default();
        let one = empty.with_entry(
            ArtifactKey::Sanitized,
            ArtifactRef {
                path: "/lib/book.sanitized.md".into(),
                hash: "abc".into(),
                derived_from: None,
            },
        );
        assert!(empty.is_empty());
        assert_eq!(one.len(), 1);
        assert_ne!(empty, one);

        let replaced = one.with_entry(
            ArtifactKey::Sanitized,
            ArtifactRef {
                path: "/lib/book.sanitized.md".into(),
                hash: "def".into(),
                derived_from: None,
            },
        );
        assert_eq!(one.get(ArtifactKey::Sanitized).map(|a| a.hash.as_str()), Some("abc"));
        assert_eq!(replaced.get(ArtifactKey::Sanitized).map(|a| a.hash.as_str()), Some("def"));
    }

    #[test]
    fn artifact_map_serializes_as_object() {
        let map = ArtifactMap::default().with_entry(
            ArtifactKey::OriginalFile,
            ArtifactRef {
                path: "/src/book.epub".into(),
                hash: "00ff".into(),
                derived_from: None,
            },
        );
        let json = serde_json::to_string(&map).expect("serialize");
        assert_eq!(json, r#"{"original_file":{"path":"/src/book.epub","hash":"00ff"}}"#);
        let parsed: ArtifactMap = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, map);
    }

    #[test]
    fn vector_status_parses_storage_names() {
        assert_eq!("to_vec".parse::<VectorStatus>(), Ok(VectorStatus::ToVec));
        assert_eq!("vec_err".parse::<VectorStatus>(), Ok(VectorStatus::VecErr));
        assert_eq!(VectorStatus::Vec.to_string(), "vec");
        assert!("queued".parse::<VectorStatus>().is_err());
    }
}
