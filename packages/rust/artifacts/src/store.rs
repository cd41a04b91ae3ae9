//! Stage file naming and atomic artifact writes.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use folio_shared::{ArtifactKey, ArtifactRef, FolioError, Result};

use crate::fingerprint;

/// Derived-artifact locations for one document, built from a directory and a stem `S`.
///
/// ```text
/// <dir>/S.md                    original_markdown
/// <dir>/S.toc_titles.md         toc_titles
/// <dir>/S.titles.md             titles
/// <dir>/S.title_changes.md      san_mapping
/// <dir>/S.sanitized.md          sanitized
/// <dir>/S.sanitized_titles.md   sanitized_titles
/// <dir>/S.vec_suggestions.json  vec_suggestions
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    dir: PathBuf,
    stem: String,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File suffix appended to the stem, or `None` for keys that are not derived files.
    pub fn suffix(key: ArtifactKey) -> Option<&'static str> {
        match key {
            ArtifactKey::OriginalFile => None,
            ArtifactKey::HierMarkdown => Some("hier.md"),
            ArtifactKey::StyleMarkdown => Some("style.md"),
            ArtifactKey::OriginalMarkdown => Some("md"),
            ArtifactKey::TocTitles => Some("toc_titles.md"),
            ArtifactKey::Titles => Some("titles.md"),
            ArtifactKey::SanMapping => Some("title_changes.md"),
            ArtifactKey::Sanitized => Some("sanitized.md"),
            ArtifactKey::SanitizedTitles => Some("sanitized_titles.md"),
            ArtifactKey::VecSuggestions => Some("vec_suggestions.json"),
        }
    }

    /// Where the artifact for `key` is written.
    pub fn path_for(&self, key: ArtifactKey) -> Option<PathBuf> {
        Self::suffix(key).map(|suffix| self.dir.join(format!("{}.{suffix}", self.stem)))
    }
}

/// Derive a filesystem-safe stem from a source file name.
pub fn stem_from_source(source: &Path) -> String {
    let raw = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(['.', '_']).to_string();

    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

/// Write `content` to `target` atomically (temp file, then rename) and fingerprint the result.
///
/// A locked target is unlocked first so it can be replaced.
#[instrument(skip(content), fields(path = %target.display(), bytes = content.len()))]
pub fn write_artifact(target: &Path, content: &[u8]) -> Result<ArtifactRef> {
    let dir = target
        .parent()
        .ok_or_else(|| FolioError::validation(format!("{} has no parent", target.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| FolioError::io(dir, e))?;

    if target.exists() && fingerprint::is_locked(target)? {
        debug!("replacing locked artifact");
        fingerprint::unlock(target)?;
    }

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = dir.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| FolioError::io(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| FolioError::io(target, e))?;

    let path = std::fs::canonicalize(target).map_err(|e| FolioError::io(target, e))?;
    let hash = fingerprint::hash_file(&path)?;
    debug!(%hash, "artifact written");

    Ok(ArtifactRef {
        path,
        hash,
        derived_from: None,
    })
}

/// [`write_artifact`] followed by [`fingerprint::lock`].
pub fn write_locked_artifact(target: &Path, content: &[u8]) -> Result<ArtifactRef> {
    let artifact = write_artifact(target, content)?;
    fingerprint::lock(&artifact.path)?;
    Ok(artifact)
}

/// Fingerprint an existing file in place, resolving it to an absolute path.
pub fn fingerprint_existing(path: &Path) -> Result<ArtifactRef> {
    let path = std::fs::canonicalize(path).map_err(|e| FolioError::io(path, e))?;
    let hash = fingerprint::hash_file(&path)?;
    Ok(ArtifactRef {
        path,
        hash,
        derived_from: None,
    })
}

/// Delete an artifact file, unlocking it first. Missing files are ignored.
pub fn remove_artifact(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    fingerprint::unlock(path)?;
    std::fs::remove_file(path).map_err(|e| FolioError::io(path, e))
}
