//! Pipeline artifact handling for folio.
//!
//! - [`fingerprint`]: streaming SHA-256 and read-only locking
//! - [`ArtifactPaths`]: where each stage writes its file
//! - [`write_artifact`] / [`write_locked_artifact`]: atomic writes returning an [`ArtifactRef`]
//! - [`VecSuggestions`]: hash-pinned line references into a sanitized file
//!
//! [`ArtifactRef`]: folio_shared::ArtifactRef

pub mod fingerprint;
mod store;
mod suggestions;

pub use fingerprint::{hash_bytes, hash_file, is_locked, lock, unlock};
pub use store::{
    ArtifactPaths, fingerprint_existing, remove_artifact, stem_from_source, write_artifact,
    write_locked_artifact,
};
pub use suggestions::VecSuggestions;
