//! Error types for folio.
//!
//! Library crates use [`FolioError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::ArtifactKey;

/// Top-level error type for all folio operations.
#[derive(Debug, thiserror::Error)]
pub enum FolioError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A path referenced by a record does not exist on disk.
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The file at `path` no longer matches the digest recorded for it.
    #[error("hash mismatch for {}: stored {stored}, current {current}", path.display())]
    HashMismatch {
        path: PathBuf,
        stored: String,
        current: String,
    },

    /// A stage was requested before the artifacts it consumes were produced.
    #[error("stage `{stage}` is missing prerequisites: {}", describe_missing(missing))]
    MissingPrerequisite {
        stage: String,
        missing: Vec<ArtifactKey>,
    },

    /// A heading-change document contained no usable directives.
    #[error("malformed directive document: {message}")]
    MalformedDirectives { message: String },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Source-to-markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// External producer (LLM bridge) error.
    #[error("bridge error: {0}")]
    Bridge(String),

    /// Embedding provider error.
    #[error("embedding error: {0}")]
    Embedding(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FolioError>;

fn describe_missing(missing: &[ArtifactKey]) -> String {
    missing
        .iter()
        .map(|key| format!("{key} (run `folio {}`)", key.producer()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl FolioError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a malformed-directive error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedDirectives {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    ///
    /// `NotFound` I/O errors are promoted to [`FolioError::NotFound`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound { path };
        }
        Self::Io { path, source }
    }

    /// Whether this error is a [`FolioError::HashMismatch`].
    pub fn is_hash_mismatch(&self) -> bool {
        matches!(self, Self::HashMismatch { .. })
    }
}
