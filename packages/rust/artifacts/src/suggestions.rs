//! Vectorization suggestions: line numbers of a sanitized file worth embedding.
//!
//! Line numbers are not content-addressed, so the file carries the hash of the
//! sanitized document they were computed against. Consumers must compare it with
//! the document's current hash before trusting any line reference.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use folio_shared::{FolioError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VecSuggestions {
    /// SHA-256 of the sanitized file the line numbers refer to.
    pub target_hash: String,
    pub generated_at: DateTime<Utc>,
    /// 1-based line numbers, ascending.
    pub lines: BTreeSet<usize>,
}

impl VecSuggestions {
    pub fn new(target_hash: impl Into<String>, lines: impl IntoIterator<Item = usize>) -> Self {
        Self {
            target_hash: target_hash.into(),
            generated_at: Utc::now(),
            lines: lines.into_iter().collect(),
        }
    }

    pub fn contains(&self, line: usize) -> bool {
        self.lines.contains(&line)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FolioError::validation(format!("serialize suggestions: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| FolioError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            FolioError::validation(format!("invalid suggestions file {}: {e}", path.display()))
        })
    }
}
