//! libSQL storage layer (embedded, offline).
//!
//! The [`Storage`] struct wraps a libSQL database holding document records
//! (with their artifact maps) and the chunks derived from them.
//!
//! **Access rules:**
//! - Pipeline stages: read-write (single writer) via [`Storage::open`]
//! - Inspection tools: read-only via [`Storage::open_readonly`]

mod migrations;

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use folio_shared::{
    ArtifactMap, Chunk, DocId, Document, FolioError, NewChunk, Result, Toc, VectorStatus,
};
use libsql::{Connection, Database, params};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Outcome of one chunk within a committed vectorization batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Embedded { id: i64, embedding: Vec<f32> },
    Failed { id: i64, error: String },
}

fn storage_err(e: libsql::Error) -> FolioError {
    FolioError::Storage(e.to_string())
}

const DOCUMENT_COLUMNS: &str =
    "id, identity_hash, title, author, stem, artifacts_json, toc_json, created_at, updated_at";

const CHUNK_COLUMNS: &str =
    "id, work_id, parent_id, source_line, content, vector_status, embedding";

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FolioError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        FolioError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(FolioError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Document operations
    // -----------------------------------------------------------------------

    /// Insert a new document record.
    pub async fn insert_document(&self, doc: &Document) -> Result<()> {
        self.check_writable()?;
        let artifacts_json = to_json(&doc.artifacts)?;
        let toc_json = doc.toc.as_ref().map(to_json).transpose()?;
        self.conn
            .execute(
                "INSERT INTO documents (id, identity_hash, title, author, stem, artifacts_json, toc_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    doc.id.to_string(),
                    doc.identity_hash.as_str(),
                    doc.title.as_deref(),
                    doc.author.as_deref(),
                    doc.stem.as_str(),
                    artifacts_json,
                    toc_json,
                    doc.created_at.to_rfc3339(),
                    doc.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get a document by ID.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.query_one_document(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
            id,
        )
        .await
    }

    /// Get a document by its identity (acquisition) hash.
    pub async fn find_document_by_hash(&self, identity_hash: &str) -> Result<Option<Document>> {
        self.query_one_document(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE identity_hash = ?1"),
            identity_hash,
        )
        .await
    }

    async fn query_one_document(&self, sql: &str, key: &str) -> Result<Option<Document>> {
        let mut rows = self
            .conn
            .query(sql, params![key])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List all documents, oldest first.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY created_at, id"),
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_document(&row)?);
        }
        Ok(results)
    }

    /// Replace a document's artifact map as a whole.
    pub async fn update_artifacts(&self, id: &DocId, artifacts: &ArtifactMap) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE documents SET artifacts_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![to_json(artifacts)?, now.as_str(), id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(FolioError::Storage(format!("no document with id {id}")));
        }
        Ok(())
    }

    /// Replace a document's structured table of contents.
    pub async fn update_toc(&self, id: &DocId, toc: Option<&Toc>) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let toc_json = toc.map(to_json).transpose()?;
        self.conn
            .execute(
                "UPDATE documents SET toc_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![toc_json, now.as_str(), id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Delete a document and all of its chunks.
    pub async fn delete_document(&self, id: &DocId) -> Result<()> {
        self.check_writable()?;
        self.delete_chunks(id).await?;
        self.conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Chunk operations
    // -----------------------------------------------------------------------

    /// Replace every chunk of `work_id` with `chunks`, in one transaction.
    ///
    /// `parent` indexes an earlier entry of `chunks`; it is resolved to that
    /// entry's row ID. Every row records `source_hash`, the hash of the sanitized
    /// file it was cut from. On any error the previous chunk set is kept.
    /// Returns the generated IDs in input order.
    pub async fn replace_chunks(
        &self,
        work_id: &DocId,
        source_hash: &str,
        chunks: &[NewChunk],
    ) -> Result<Vec<i64>> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(storage_err)?;

        match write_chunk_set(&tx, work_id, source_hash, chunks).await {
            Ok(ids) => {
                tx.commit().await.map_err(storage_err)?;
                Ok(ids)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "chunk replacement rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Distinct sanitized hashes the document's chunks were cut from.
    pub async fn chunk_source_hashes(&self, work_id: &DocId) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT source_hash FROM chunks
                 WHERE work_id = ?1 AND source_hash IS NOT NULL
                 ORDER BY source_hash",
                params![work_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut hashes = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            hashes.push(row.get::<String>(0).map_err(storage_err)?);
        }
        Ok(hashes)
    }

    /// Delete every chunk of a document. Returns the number removed.
    pub async fn delete_chunks(&self, work_id: &DocId) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM chunks WHERE work_id = ?1",
                params![work_id.to_string()],
            )
            .await
            .map_err(storage_err)
    }

    /// All chunks of a document in ID order.
    pub async fn list_chunks(&self, work_id: &DocId) -> Result<Vec<Chunk>> {
        self.query_chunks(
            &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE work_id = ?1 ORDER BY id"),
            params![work_id.to_string()],
        )
        .await
    }

    /// Up to `limit` chunks eligible for embedding, in ID order.
    ///
    /// Eligible means `to_vec`, attached to a parent heading, and not yet embedded.
    pub async fn select_eligible_chunks(&self, work_id: &DocId, limit: usize) -> Result<Vec<Chunk>> {
        self.query_chunks(
            &format!(
                "SELECT {CHUNK_COLUMNS} FROM chunks
                 WHERE work_id = ?1
                   AND vector_status = 'to_vec'
                   AND parent_id IS NOT NULL
                   AND embedding IS NULL
                 ORDER BY id
                 LIMIT ?2"
            ),
            params![work_id.to_string(), limit as i64],
        )
        .await
    }

    async fn query_chunks(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<Chunk>> {
        let mut rows = self.conn.query(sql, params).await.map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_chunk(&row)?);
        }
        Ok(results)
    }

    /// Commit the outcome of one vectorization batch atomically.
    ///
    /// Only rows still in `to_vec` are updated, so an embedded chunk never
    /// changes state again.
    pub async fn commit_batch(&self, outcomes: &[ChunkOutcome]) -> Result<()> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(storage_err)?;

        for outcome in outcomes {
            match outcome {
                ChunkOutcome::Embedded { id, embedding } => {
                    tx.execute(
                        "UPDATE chunks SET vector_status = 'vec', embedding = ?1, vec_error = NULL
                         WHERE id = ?2 AND vector_status = 'to_vec'",
                        params![encode_embedding(embedding), *id],
                    )
                    .await
                    .map_err(storage_err)?;
                }
                ChunkOutcome::Failed { id, error } => {
                    tx.execute(
                        "UPDATE chunks SET vector_status = 'vec_err', vec_error = ?1
                         WHERE id = ?2 AND vector_status = 'to_vec'",
                        params![error.as_str(), *id],
                    )
                    .await
                    .map_err(storage_err)?;
                }
            }
        }

        tx.commit().await.map_err(storage_err)
    }

    /// Move a document's `vec_err` chunks back to `to_vec`. Returns the number moved.
    pub async fn reset_errored_chunks(&self, work_id: &DocId) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE chunks SET vector_status = 'to_vec', vec_error = NULL
                 WHERE work_id = ?1 AND vector_status = 'vec_err'",
                params![work_id.to_string()],
            )
            .await
            .map_err(storage_err)
    }

    /// Chunk counts per vector status (statuses with no chunks are absent).
    pub async fn count_chunks_by_status(
        &self,
        work_id: &DocId,
    ) -> Result<HashMap<VectorStatus, usize>> {
        let mut rows = self
            .conn
            .query(
                "SELECT vector_status, COUNT(*) FROM chunks WHERE work_id = ?1 GROUP BY vector_status",
                params![work_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut counts = HashMap::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let status: String = row.get(0).map_err(storage_err)?;
            let count: i64 = row.get(1).map_err(storage_err)?;
            let status = status.parse::<VectorStatus>().map_err(FolioError::Storage)?;
            counts.insert(status, count as usize);
        }
        Ok(counts)
    }
}

/// Delete the document's chunks and insert `chunks` on `tx`.
async fn write_chunk_set(
    tx: &libsql::Transaction,
    work_id: &DocId,
    source_hash: &str,
    chunks: &[NewChunk],
) -> Result<Vec<i64>> {
    let removed = tx
        .execute(
            "DELETE FROM chunks WHERE work_id = ?1",
            params![work_id.to_string()],
        )
        .await
        .map_err(storage_err)?;
    if removed > 0 {
        tracing::debug!(removed, "previous chunks deleted");
    }

    let mut ids: Vec<i64> = Vec::with_capacity(chunks.len());
    for (idx, chunk) in chunks.iter().enumerate() {
        let parent_id = match chunk.parent {
            Some(parent) => Some(*ids.get(parent).ok_or_else(|| {
                FolioError::Storage(format!(
                    "chunk {idx} refers to parent {parent}, which is not an earlier chunk"
                ))
            })?),
            None => None,
        };

        let mut rows = tx
            .query(
                "INSERT INTO chunks
                    (work_id, parent_id, source_line, content, vector_status, source_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 RETURNING id",
                params![
                    work_id.to_string(),
                    parent_id,
                    chunk.source_line as i64,
                    chunk.content.as_str(),
                    chunk.vector_status.as_str(),
                    source_hash,
                ],
            )
            .await
            .map_err(storage_err)?;
        let id = match rows.next().await.map_err(storage_err)? {
            Some(row) => row.get::<i64>(0).map_err(storage_err)?,
            None => return Err(FolioError::Storage("chunk insert returned no id".into())),
        };
        ids.push(id);
    }
    Ok(ids)
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| FolioError::Storage(format!("encode json: {e}")))
}

/// Little-endian `f32` bytes.
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(FolioError::Storage(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn parse_timestamp(s: &str) -> Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FolioError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`Document`].
fn row_to_document(row: &libsql::Row) -> Result<Document> {
    let id: String = row.get(0).map_err(storage_err)?;
    let artifacts_json: String = row.get(5).map_err(storage_err)?;
    let toc_json: Option<String> = row.get::<String>(6).ok();
    let created_at: String = row.get(7).map_err(storage_err)?;
    let updated_at: String = row.get(8).map_err(storage_err)?;

    Ok(Document {
        id: id
            .parse()
            .map_err(|e| FolioError::Storage(format!("invalid document id {id}: {e}")))?,
        identity_hash: row.get::<String>(1).map_err(storage_err)?,
        title: row.get::<String>(2).ok(),
        author: row.get::<String>(3).ok(),
        stem: row.get::<String>(4).map_err(storage_err)?,
        artifacts: serde_json::from_str(&artifacts_json)
            .map_err(|e| FolioError::Storage(format!("invalid artifacts_json: {e}")))?,
        toc: toc_json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| FolioError::Storage(format!("invalid toc_json: {e}")))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Convert a database row to a [`Chunk`].
fn row_to_chunk(row: &libsql::Row) -> Result<Chunk> {
    let status: String = row.get(5).map_err(storage_err)?;
    let embedding = match row.get::<Vec<u8>>(6).ok() {
        Some(bytes) => Some(decode_embedding(&bytes)?),
        None => None,
    };

    Ok(Chunk {
        id: row.get::<i64>(0).map_err(storage_err)?,
        work_id: row.get::<String>(1).map_err(storage_err)?,
        parent_id: row.get::<i64>(2).ok(),
        source_line: row.get::<i64>(3).map_err(storage_err)? as usize,
        content: row.get::<String>(4).map_err(storage_err)?,
        vector_status: status.parse().map_err(FolioError::Storage)?,
        embedding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_shared::{ArtifactKey, ArtifactRef, TocEntry};
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("folio_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn test_document(hash: &str) -> Document {
        Document {
            id: DocId::new(),
            identity_hash: hash.into(),
            title: Some("Moby Dick".into()),
            author: None,
            stem: "moby".into(),
            artifacts: ArtifactMap::default().with_entry(
                ArtifactKey::OriginalFile,
                ArtifactRef {
                    path: "/in/moby.md".into(),
                    hash: hash.into(),
                    derived_from: None,
                },
            ),
            toc: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn new_chunk(parent: Option<usize>, line: usize, status: VectorStatus) -> NewChunk {
        NewChunk {
            parent,
            source_line: line,
            content: format!("content at line {line}"),
            vector_status: status,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("folio_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn document_crud() {
        let storage = test_storage().await;
        let doc = test_document("hash-1");
        storage.insert_document(&doc).await.expect("insert");

        let found = storage
            .get_document(&doc.id.to_string())
            .await
            .expect("get")
            .expect("present");
        assert_eq!(found.identity_hash, "hash-1");
        assert_eq!(found.title.as_deref(), Some("Moby Dick"));
        assert_eq!(found.artifacts, doc.artifacts);
        assert!(found.author.is_none());

        let by_hash = storage.find_document_by_hash("hash-1").await.unwrap();
        assert_eq!(by_hash.map(|d| d.id), Some(doc.id.clone()));
        assert!(storage.find_document_by_hash("nope").await.unwrap().is_none());

        assert_eq!(storage.list_documents().await.unwrap().len(), 1);

        storage.delete_document(&doc.id).await.expect("delete");
        assert!(storage.get_document(&doc.id.to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn identity_hash_is_unique() {
        let storage = test_storage().await;
        storage.insert_document(&test_document("same")).await.unwrap();
        assert!(storage.insert_document(&test_document("same")).await.is_err());
    }

    #[tokio::test]
    async fn artifacts_replaced_as_whole_value() {
        let storage = test_storage().await;
        let doc = test_document("hash-2");
        storage.insert_document(&doc).await.unwrap();

        let next = doc.artifacts.with_entry(
            ArtifactKey::Sanitized,
            ArtifactRef {
                path: "/lib/moby.sanitized.md".into(),
                hash: "san".into(),
                derived_from: None,
            },
        );
        storage.update_artifacts(&doc.id, &next).await.expect("update");

        let found = storage.get_document(&doc.id.to_string()).await.unwrap().unwrap();
        assert_eq!(found.artifacts.len(), 2);
        assert!(found.artifacts.contains(ArtifactKey::OriginalFile));
        assert_eq!(found.artifacts.get(ArtifactKey::Sanitized).unwrap().hash, "san");
        // Identity is not touched by artifact updates.
        assert_eq!(found.identity_hash, "hash-2");

        let missing = DocId::new();
        assert!(storage.update_artifacts(&missing, &next).await.is_err());
    }

    #[tokio::test]
    async fn toc_roundtrip() {
        let storage = test_storage().await;
        let doc = test_document("hash-toc");
        storage.insert_document(&doc).await.unwrap();

        let toc = Toc {
            sections: vec![TocEntry {
                title: "Loomings".into(),
                level: 1,
                line: 3,
                children: vec![],
            }],
        };
        storage.update_toc(&doc.id, Some(&toc)).await.unwrap();
        let found = storage.get_document(&doc.id.to_string()).await.unwrap().unwrap();
        assert_eq!(found.toc, Some(toc));
    }

    #[tokio::test]
    async fn eligibility_predicate() {
        let storage = test_storage().await;
        let doc = test_document("hash-3");
        storage.insert_document(&doc).await.unwrap();

        let ids = storage
            .replace_chunks(
                &doc.id,
                "san-3",
                &[
                    new_chunk(None, 1, VectorStatus::NoVec),
                    // Scheduled but parentless: not eligible.
                    new_chunk(None, 2, VectorStatus::ToVec),
                    new_chunk(Some(0), 3, VectorStatus::ToVec),
                    new_chunk(Some(0), 4, VectorStatus::NoVec),
                ],
            )
            .await
            .unwrap();
        let (heading, eligible) = (ids[0], ids[2]);

        let selected = storage.select_eligible_chunks(&doc.id, 20).await.unwrap();
        assert_eq!(selected.iter().map(|c| c.id).collect::<Vec<_>>(), vec![eligible]);
        assert_eq!(selected[0].parent_id, Some(heading));
        assert!(selected[0].embedding.is_none());
    }

    #[tokio::test]
    async fn replace_chunks_swaps_the_whole_set() {
        let storage = test_storage().await;
        let doc = test_document("hash-5");
        storage.insert_document(&doc).await.unwrap();

        storage
            .replace_chunks(
                &doc.id,
                "old",
                &[
                    new_chunk(None, 1, VectorStatus::NoVec),
                    new_chunk(Some(0), 2, VectorStatus::ToVec),
                ],
            )
            .await
            .unwrap();
        let ids = storage
            .replace_chunks(&doc.id, "new", &[new_chunk(None, 7, VectorStatus::NoVec)])
            .await
            .unwrap();

        let chunks = storage.list_chunks(&doc.id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, ids[0]);
        assert_eq!(chunks[0].source_line, 7);
        assert_eq!(storage.chunk_source_hashes(&doc.id).await.unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn failed_replace_keeps_previous_chunks() {
        let storage = test_storage().await;
        let doc = test_document("hash-6");
        storage.insert_document(&doc).await.unwrap();

        let original = storage
            .replace_chunks(
                &doc.id,
                "first",
                &[
                    new_chunk(None, 1, VectorStatus::NoVec),
                    new_chunk(Some(0), 2, VectorStatus::ToVec),
                ],
            )
            .await
            .unwrap();

        // The third entry points at a parent that comes after it.
        let result = storage
            .replace_chunks(
                &doc.id,
                "second",
                &[
                    new_chunk(None, 1, VectorStatus::NoVec),
                    new_chunk(Some(0), 2, VectorStatus::ToVec),
                    new_chunk(Some(5), 3, VectorStatus::ToVec),
                ],
            )
            .await;
        assert!(matches!(result, Err(FolioError::Storage(_))));

        let chunks = storage.list_chunks(&doc.id).await.unwrap();
        assert_eq!(chunks.iter().map(|c| c.id).collect::<Vec<_>>(), original);
        assert_eq!(storage.chunk_source_hashes(&doc.id).await.unwrap(), vec!["first"]);
        assert_eq!(storage.select_eligible_chunks(&doc.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_batch_updates_status_and_embedding() {
        let storage = test_storage().await;
        let doc = test_document("hash-4");
        storage.insert_document(&doc).await.unwrap();
        let ids = storage
            .replace_chunks(
                &doc.id,
                "san-4",
                &[
                    new_chunk(None, 1, VectorStatus::NoVec),
                    new_chunk(Some(0), 2, VectorStatus::ToVec),
                    new_chunk(Some(0), 3, VectorStatus::ToVec),
                ],
            )
            .await
            .unwrap();
        let (a, b) = (ids[1], ids[2]);

        storage
            .commit_batch(&[
                ChunkOutcome::Embedded {
                    id: a,
                    embedding: vec![0.5, -1.25, 3.0],
                },
                ChunkOutcome::Failed {
                    id: b,
                    error: "bad vector".into(),
                },
            ])
            .await
            .unwrap();

        let chunks = storage.list_chunks(&doc.id).await.unwrap();
        assert_eq!(chunks[1].vector_status, VectorStatus::Vec);
        assert_eq!(chunks[1].embedding, Some(vec![0.5, -1.25, 3.0]));
        assert_eq!(chunks[2].vector_status, VectorStatus::VecErr);
        assert!(chunks[2].embedding.is_none());

        // A later failure can not pull an embedded chunk out of `vec`.
        storage
            .commit_batch(&[ChunkOutcome::Failed {
                id: a,
                error: "late".into(),
            }])
            .await
            .unwrap();
        let chunks = storage.list_chunks(&doc.id).await.unwrap();
        assert_eq!(chunks[1].vector_status, VectorStatus::Vec);

        let counts = storage.count_chunks_by_status(&doc.id).await.unwrap();
        assert_eq!(counts.get(&VectorStatus::Vec), Some(&1));
        assert_eq!(counts.get(&VectorStatus::VecErr), Some(&1));
        assert_eq!(counts.get(&VectorStatus::NoVec), Some(&1));

        assert_eq!(storage.reset_errored_chunks(&doc.id).await.unwrap(), 1);
        let eligible = storage.select_eligible_chunks(&doc.id, 10).await.unwrap();
        assert_eq!(eligible.iter().map(|c| c.id).collect::<Vec<_>>(), vec![b]);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("folio_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_document(&test_document("ro-1")).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_documents().await.unwrap().len(), 1);
        let result = ro.insert_document(&test_document("ro-2")).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[test]
    fn embedding_blob_roundtrip() {
        let v = vec![1.0f32, -0.0, f32::MIN_POSITIVE, 42.5];
        assert_eq!(decode_embedding(&encode_embedding(&v)).unwrap(), v);
        assert!(decode_embedding(&[1, 2, 3]).is_err());
    }
}
