//! Artifact registry: per-document stage key → `{path, hash}` persistence.

use std::path::Path;

use tracing::{debug, instrument};

use folio_shared::{ArtifactKey, ArtifactRef, Document, FolioError, Result};
use folio_storage::Storage;

/// Look up the artifact recorded under `key`.
pub fn get(document: &Document, key: ArtifactKey) -> Option<&ArtifactRef> {
    document.artifacts.get(key)
}

/// Record `artifact` under `key` and persist the document's whole artifact map.
///
/// The map is rebuilt as a new value and stored in full; the in-memory
/// document is only reassigned once the write succeeded.
#[instrument(skip_all, fields(doc = %document.id, key = %key))]
pub async fn set(
    storage: &Storage,
    document: &mut Document,
    key: ArtifactKey,
    artifact: ArtifactRef,
) -> Result<()> {
    let next = document.artifacts.with_entry(key, artifact);
    storage.update_artifacts(&document.id, &next).await?;
    debug!(entries = next.len(), "artifact map persisted");
    document.artifacts = next;
    Ok(())
}

/// Find a document by ID or by identity hash.
pub async fn resolve_document(storage: &Storage, reference: &str) -> Result<Document> {
    if let Some(doc) = storage.get_document(reference).await? {
        return Ok(doc);
    }
    if let Some(doc) = storage.find_document_by_hash(reference).await? {
        return Ok(doc);
    }
    Err(FolioError::validation(format!(
        "no document with id or hash `{reference}`"
    )))
}

/// Read the text of an artifact the gate has already approved.
pub fn read_text(artifact: &ArtifactRef) -> Result<String> {
    read_path(&artifact.path)
}

pub(crate) fn read_path(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| FolioError::io(path, e))
}
