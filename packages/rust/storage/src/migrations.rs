//! SQL migration definitions for the folio database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: documents, chunks",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Tracked source works. `artifacts_json` is always rewritten as a whole.
CREATE TABLE IF NOT EXISTS documents (
    id             TEXT PRIMARY KEY,
    identity_hash  TEXT NOT NULL UNIQUE,
    title          TEXT,
    author         TEXT,
    stem           TEXT NOT NULL,
    artifacts_json TEXT NOT NULL DEFAULT '{}',
    toc_json       TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

-- Content units derived from a sanitized document
CREATE TABLE IF NOT EXISTS chunks (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    work_id       TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    parent_id     INTEGER REFERENCES chunks(id) ON DELETE CASCADE,
    source_line   INTEGER NOT NULL,
    content       TEXT NOT NULL,
    vector_status TEXT NOT NULL DEFAULT 'no_vec'
        CHECK (vector_status IN ('no_vec', 'to_vec', 'vec', 'vec_err')),
    embedding     BLOB,
    vec_error     TEXT
);

CREATE INDEX IF NOT EXISTS idx_chunks_work_id ON chunks(work_id);
CREATE INDEX IF NOT EXISTS idx_chunks_status ON chunks(work_id, vector_status);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Record the sanitized hash each chunk was cut from",
            sql: r#"
ALTER TABLE chunks ADD COLUMN source_hash TEXT;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_ascending() {
        let versions: Vec<u32> = all_migrations().iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
        assert_eq!(versions.first(), Some(&1));
    }
}
