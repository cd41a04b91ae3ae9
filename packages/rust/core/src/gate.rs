//! Pipeline gate: prerequisite and freshness checks run before a stage reads
//! anything it did not produce itself.

use tracing::{debug, warn};

use folio_artifacts::hash_file;
use folio_shared::{ArtifactKey, ArtifactRef, Document, FolioError, Result};

/// Fail with [`FolioError::MissingPrerequisite`] naming every key in
/// `required` that `document` has not recorded.
pub fn require_prerequisites(
    document: &Document,
    stage: &str,
    required: &[ArtifactKey],
) -> Result<()> {
    let missing: Vec<ArtifactKey> = required
        .iter()
        .copied()
        .filter(|key| !document.artifacts.contains(*key))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }
    Err(FolioError::MissingPrerequisite {
        stage: stage.to_string(),
        missing,
    })
}

/// Recompute the digest of `artifact.path` and compare it with the recorded one.
pub fn verify_freshness(artifact: &ArtifactRef) -> Result<()> {
    let current = hash_file(&artifact.path)?;
    if current != artifact.hash {
        return Err(FolioError::HashMismatch {
            path: artifact.path.clone(),
            stored: artifact.hash.clone(),
            current,
        });
    }
    debug!(path = %artifact.path.display(), "artifact is fresh");
    Ok(())
}

/// [`verify_freshness`], except that a mismatch is only logged when `force` is set.
///
/// A missing file is never forceable.
pub fn check_freshness(artifact: &ArtifactRef, force: bool) -> Result<()> {
    match verify_freshness(artifact) {
        Err(FolioError::HashMismatch {
            path,
            stored,
            current,
        }) if force => {
            warn!(
                path = %path.display(),
                %stored,
                %current,
                "artifact changed since it was recorded; continuing because of --force"
            );
            Ok(())
        }
        other => other,
    }
}

/// Check that `artifact` was derived from the bytes `basis` currently records.
///
/// Artifacts without a recorded derivation pass. A mismatch is only logged
/// when `force` is set.
pub fn check_derivation(artifact: &ArtifactRef, basis: &ArtifactRef, force: bool) -> Result<()> {
    let Some(derived_from) = &artifact.derived_from else {
        return Ok(());
    };
    if *derived_from == basis.hash {
        return Ok(());
    }
    if force {
        warn!(
            artifact = %artifact.path.display(),
            basis = %basis.path.display(),
            stored = %derived_from,
            current = %basis.hash,
            "artifact was derived from an older input; continuing because of --force"
        );
        return Ok(());
    }
    Err(FolioError::HashMismatch {
        path: basis.path.clone(),
        stored: derived_from.clone(),
        current: basis.hash.clone(),
    })
}

/// Gate `stage` on `required` and check each recorded artifact for drift.
pub fn admit(document: &Document, stage: &str, required: &[ArtifactKey], force: bool) -> Result<()> {
    require_prerequisites(document, stage, required)?;
    for key in required {
        if let Some(artifact) = document.artifacts.get(*key) {
            check_freshness(artifact, force)?;
        }
    }
    Ok(())
}

/// Freshness of a recorded artifact, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale { current: String },
    Missing,
}

impl Freshness {
    pub fn of(artifact: &ArtifactRef) -> Result<Self> {
        match verify_freshness(artifact) {
            Ok(()) => Ok(Self::Fresh),
            Err(FolioError::HashMismatch { current, .. }) => Ok(Self::Stale { current }),
            Err(FolioError::NotFound { .. }) => Ok(Self::Missing),
            Err(e) => Err(e),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale { .. } => "STALE",
            Self::Missing => "missing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use folio_artifacts::write_artifact;
    use folio_shared::{ArtifactMap, DocId};
    use std::path::PathBuf;
    use uuid::Uuid;

    fn temp_file(content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("folio_gate_{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("doc.md");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn document(artifacts: ArtifactMap) -> Document {
        Document {
            id: DocId::new(),
            identity_hash: "id".into(),
            title: None,
            author: None,
            stem: "doc".into(),
            artifacts,
            toc: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn missing_prerequisites_lists_every_key() {
        let artifacts = ArtifactMap::default().with_entry(
            ArtifactKey::OriginalMarkdown,
            ArtifactRef {
                path: "/x.md".into(),
                hash: "h".into(),
                derived_from: None,
            },
        );
        let doc = document(artifacts);
        let err = require_prerequisites(
            &doc,
            "chunk",
            &[
                ArtifactKey::OriginalMarkdown,
                ArtifactKey::Sanitized,
                ArtifactKey::VecSuggestions,
            ],
        )
        .unwrap_err();

        match err {
            FolioError::MissingPrerequisite { stage, missing } => {
                assert_eq!(stage, "chunk");
                assert_eq!(missing, vec![ArtifactKey::Sanitized, ArtifactKey::VecSuggestions]);
            }
            other => panic!("expected MissingPrerequisite, got {other:?}"),
        }
        assert!(require_prerequisites(&doc, "titles", &[ArtifactKey::OriginalMarkdown]).is_ok());
    }

    #[test]
    fn rewrite_with_different_bytes_is_a_mismatch() {
        let path = temp_file("# Title\n");
        let artifact = write_artifact(&path, b"# Title\n").unwrap();
        let stored = artifact.hash.clone();

        std::fs::write(&path, "# Title!\n").unwrap();
        match verify_freshness(&artifact).unwrap_err() {
            FolioError::HashMismatch {
                stored: s,
                current,
                ..
            } => {
                assert_eq!(s, stored);
                assert_eq!(current, hash_file(&path).unwrap());
                assert_ne!(current, stored);
            }
            other => panic!("expected HashMismatch, got {other:?}"),
        }
    }

    #[test]
    fn rewrite_with_identical_bytes_passes() {
        let path = temp_file("# Title\n");
        let artifact = write_artifact(&path, b"# Title\n").unwrap();
        std::fs::write(&path, "# Title\n").unwrap();
        assert!(verify_freshness(&artifact).is_ok());
    }

    #[test]
    fn force_downgrades_mismatch_but_not_missing() {
        let path = temp_file("a\n");
        let artifact = write_artifact(&path, b"a\n").unwrap();
        std::fs::write(&path, "b\n").unwrap();

        assert!(check_freshness(&artifact, false).unwrap_err().is_hash_mismatch());
        assert!(check_freshness(&artifact, true).is_ok());

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            check_freshness(&artifact, true),
            Err(FolioError::NotFound { .. })
        ));
    }

    #[test]
    fn derivation_must_match_basis_hash() {
        let basis = ArtifactRef {
            path: "/lib/book.md".into(),
            hash: "new".into(),
            derived_from: None,
        };
        let current = ArtifactRef {
            path: "/lib/book.title_changes.md".into(),
            hash: "c".into(),
            derived_from: None,
        }
        .derived_from("new");
        let outdated = current.clone().derived_from("old");
        let unpinned = ArtifactRef {
            derived_from: None,
            ..current.clone()
        };

        assert!(check_derivation(&current, &basis, false).is_ok());
        assert!(check_derivation(&unpinned, &basis, false).is_ok());
        match check_derivation(&outdated, &basis, false).unwrap_err() {
            FolioError::HashMismatch {
                path,
                stored,
                current,
            } => {
                assert_eq!(path, PathBuf::from("/lib/book.md"));
                assert_eq!(stored, "old");
                assert_eq!(current, "new");
            }
            other => panic!("expected HashMismatch, got {other:?}"),
        }
        assert!(check_derivation(&outdated, &basis, true).is_ok());
    }

    #[test]
    fn freshness_labels() {
        let path = temp_file("a\n");
        let artifact = write_artifact(&path, b"a\n").unwrap();
        assert_eq!(Freshness::of(&artifact).unwrap(), Freshness::Fresh);

        std::fs::write(&path, "b\n").unwrap();
        let stale = Freshness::of(&artifact).unwrap();
        assert_eq!(stale.label(), "STALE");

        std::fs::remove_file(&path).unwrap();
        assert_eq!(Freshness::of(&artifact).unwrap(), Freshness::Missing);
    }

    #[test]
    fn admit_checks_presence_then_freshness() {
        let path = temp_file("x\n");
        let artifact = write_artifact(&path, b"x\n").unwrap();
        let doc = document(ArtifactMap::default().with_entry(ArtifactKey::Sanitized, artifact));

        assert!(admit(&doc, "chunk", &[ArtifactKey::Sanitized], false).is_ok());
        std::fs::write(&path, "y\n").unwrap();
        assert!(admit(&doc, "chunk", &[ArtifactKey::Sanitized], false).is_err());
        assert!(admit(&doc, "chunk", &[ArtifactKey::Sanitized], true).is_ok());
    }
}
