//! Pipeline stages: register → convert → titles → suggest → sanitize →
//! suggest-vec → chunk → vectorize.
//!
//! Every stage follows the same shape: ask the gate for its prerequisites,
//! read the approved artifacts, write its own artifact atomically, then record
//! it in the document's artifact map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use chrono::Utc;
use tracing::{info, instrument, warn};

use folio_artifacts::{
    ArtifactPaths, VecSuggestions, fingerprint_existing, hash_bytes, remove_artifact,
    stem_from_source, write_artifact, write_locked_artifact,
};
use folio_markdown::{Dialect, SourceConverter, build_toc, list_headings};
use folio_shared::{
    ArtifactKey, ArtifactMap, ArtifactRef, ChunkingConfig, DocId, Document, FolioError, NewChunk,
    Result, VectorStatus, VectorizeConfig,
};
use folio_storage::Storage;

use crate::bridge::SuggestionProducer;
use crate::chunker::{self, PieceKind};
use crate::gate::{self, Freshness};
use crate::registry;
use crate::vectorize::{self, Embedder, VectorizeReport};

/// Progress callback for long-running stages.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each committed vectorization batch.
    fn batch_committed(&self, batch: usize, embedded: usize, failed: usize);
    /// Called when the stage completes.
    fn done(&self, summary: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn batch_committed(&self, _batch: usize, _embedded: usize, _failed: usize) {}
    fn done(&self, _summary: &str) {}
}

/// Outcome of [`Pipeline::register`].
#[derive(Debug)]
pub struct Registration {
    pub document: Document,
    /// `false` when the same bytes were already registered.
    pub created: bool,
}

/// Where the sanitize stage takes its directives from.
#[derive(Debug, Clone)]
pub struct SanitizeOptions {
    /// Explicit directive file; the recorded `san_mapping` otherwise.
    pub changes: Option<PathBuf>,
    pub dialect: Dialect,
    pub force: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            changes: None,
            dialect: Dialect::Keyword,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SanitizeReport {
    pub artifact: ArtifactRef,
    pub changed: usize,
    pub out_of_range: Vec<usize>,
    pub headings: usize,
}

#[derive(Debug, Clone)]
pub struct SuggestVecReport {
    pub artifact: ArtifactRef,
    pub lines: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkReport {
    pub headings: usize,
    pub content: usize,
    /// Content chunks created as `to_vec`.
    pub scheduled: usize,
    pub used_suggestions: bool,
}

/// Inspection view of one document.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub artifacts: Vec<(ArtifactKey, ArtifactRef, Freshness)>,
    pub chunks: HashMap<VectorStatus, usize>,
}

/// Stage runner bound to one database and one library directory.
pub struct Pipeline {
    storage: Storage,
    library_dir: PathBuf,
}

impl Pipeline {
    pub fn new(storage: Storage, library_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            library_dir: library_dir.into(),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Derived files of a document live in `<library>/<doc id>/`.
    pub fn paths(&self, document: &Document) -> ArtifactPaths {
        ArtifactPaths::new(
            self.library_dir.join(document.id.to_string()),
            document.stem.clone(),
        )
    }

    fn target(&self, document: &Document, key: ArtifactKey) -> Result<PathBuf> {
        self.paths(document).path_for(key).ok_or_else(|| {
            FolioError::validation(format!("artifact `{key}` is not a derived file"))
        })
    }

    /// Find a document by ID or identity hash.
    pub async fn document(&self, reference: &str) -> Result<Document> {
        registry::resolve_document(&self.storage, reference).await
    }

    pub async fn list(&self) -> Result<Vec<Document>> {
        self.storage.list_documents().await
    }

    /// Track a source file. Registering the same bytes twice returns the first record.
    #[instrument(skip_all, fields(source = %source.display()))]
    pub async fn register(
        &self,
        source: &Path,
        title: Option<String>,
        author: Option<String>,
    ) -> Result<Registration> {
        let original = fingerprint_existing(source)?;

        if let Some(existing) = self.storage.find_document_by_hash(&original.hash).await? {
            info!(doc = %existing.id, "source already registered");
            return Ok(Registration {
                document: existing,
                created: false,
            });
        }

        let now = Utc::now();
        let document = Document {
            id: DocId::new(),
            identity_hash: original.hash.clone(),
            title,
            author,
            stem: stem_from_source(&original.path),
            artifacts: ArtifactMap::default().with_entry(ArtifactKey::OriginalFile, original),
            toc: None,
            created_at: now,
            updated_at: now,
        };
        self.storage.insert_document(&document).await?;
        info!(doc = %document.id, stem = %document.stem, "document registered");

        Ok(Registration {
            document,
            created: true,
        })
    }

    /// `original_file` → `S.md` (`original_markdown`).
    #[instrument(skip_all, fields(doc = %document.id))]
    pub async fn convert(
        &self,
        document: &mut Document,
        converter: &dyn SourceConverter,
        force: bool,
    ) -> Result<ArtifactRef> {
        gate::admit(document, "convert", &[ArtifactKey::OriginalFile], force)?;
        let source = approved(document, ArtifactKey::OriginalFile)?;

        let markdown = converter.convert(&source.path)?;
        let target = self.target(document, ArtifactKey::OriginalMarkdown)?;
        let artifact = write_artifact(&target, markdown.as_bytes())?;
        self.record(document, ArtifactKey::OriginalMarkdown, artifact).await
    }

    /// `original_markdown` → `S.titles.md`, one `N: <heading line>` per heading.
    #[instrument(skip_all, fields(doc = %document.id))]
    pub async fn titles(&self, document: &mut Document, force: bool) -> Result<ArtifactRef> {
        gate::admit(document, "titles", &[ArtifactKey::OriginalMarkdown], force)?;
        let original = approved(document, ArtifactKey::OriginalMarkdown)?;
        let basis = original.hash.clone();
        let markdown = registry::read_text(original)?;

        let listing = list_headings(&markdown);
        let target = self.target(document, ArtifactKey::Titles)?;
        let artifact = write_artifact(&target, listing.as_bytes())?.derived_from(basis);
        self.record(document, ArtifactKey::Titles, artifact).await
    }

    /// `original_markdown` → `S.toc_titles.md` via the external producer.
    #[instrument(skip_all, fields(doc = %document.id))]
    pub async fn toc_titles(
        &self,
        document: &mut Document,
        producer: &mut dyn SuggestionProducer,
        force: bool,
    ) -> Result<ArtifactRef> {
        gate::admit(document, "toc-titles", &[ArtifactKey::OriginalMarkdown], force)?;
        let markdown = registry::read_text(approved(document, ArtifactKey::OriginalMarkdown)?)?;

        let titles = producer.extract_titles(&markdown)?;
        if titles.trim().is_empty() {
            return Err(FolioError::Bridge("producer returned an empty titles document".into()));
        }
        let target = self.target(document, ArtifactKey::TocTitles)?;
        let artifact = write_artifact(&target, titles.as_bytes())?;
        self.record(document, ArtifactKey::TocTitles, artifact).await
    }

    /// `titles` → `S.title_changes.md` (`san_mapping`).
    ///
    /// The producer's reply must parse as a keyword directive document;
    /// nothing is written otherwise.
    #[instrument(skip_all, fields(doc = %document.id))]
    pub async fn suggest(
        &self,
        document: &mut Document,
        producer: &mut dyn SuggestionProducer,
        force: bool,
    ) -> Result<ArtifactRef> {
        gate::admit(document, "suggest", &[ArtifactKey::Titles], force)?;
        let titles_ref = approved(document, ArtifactKey::Titles)?;
        // The suggested line numbers point into the markdown the titles were listed from.
        let basis = match document.artifacts.get(ArtifactKey::OriginalMarkdown) {
            Some(original) => {
                gate::check_derivation(titles_ref, original, force)?;
                Some(original.hash.clone())
            }
            None => titles_ref.derived_from.clone(),
        };
        let titles = registry::read_text(titles_ref)?;

        let reply = producer.suggest_heading_changes(&titles)?;
        let directives = folio_markdown::parse(&reply, Dialect::Keyword)?;
        info!(directives = directives.len(), "heading changes suggested");

        let target = self.target(document, ArtifactKey::SanMapping)?;
        let mut artifact = write_artifact(&target, reply.as_bytes())?;
        if let Some(basis) = basis {
            artifact = artifact.derived_from(basis);
        }
        self.record(document, ArtifactKey::SanMapping, artifact).await
    }

    /// Apply heading directives to `original_markdown`, producing the locked
    /// `S.sanitized.md`, its heading listing, and the document TOC.
    #[instrument(skip_all, fields(doc = %document.id, dialect = ?options.dialect))]
    pub async fn sanitize(
        &self,
        document: &mut Document,
        options: &SanitizeOptions,
    ) -> Result<SanitizeReport> {
        let required: &[ArtifactKey] = match options.changes {
            Some(_) => &[ArtifactKey::OriginalMarkdown],
            None => &[ArtifactKey::OriginalMarkdown, ArtifactKey::SanMapping],
        };
        gate::require_prerequisites(document, "sanitize", required)?;

        let original = approved(document, ArtifactKey::OriginalMarkdown)?;
        gate::check_freshness(original, options.force)?;
        // Suggested line numbers refer to the titles listing.
        if let Some(titles) = document.artifacts.get(ArtifactKey::Titles) {
            gate::check_freshness(titles, options.force)?;
            gate::check_derivation(titles, original, options.force)?;
        }

        let directive_doc = match &options.changes {
            Some(path) => registry::read_path(path)?,
            None => {
                let mapping = approved(document, ArtifactKey::SanMapping)?;
                gate::check_derivation(mapping, original, options.force)?;
                registry::read_text(mapping)?
            }
        };
        let source = registry::read_text(original)?;

        let applied = folio_markdown::sanitize(&source, &directive_doc, options.dialect)?;
        if !applied.out_of_range.is_empty() {
            warn!(lines = ?applied.out_of_range, "directives address lines past the end of the document");
        }

        let target = self.target(document, ArtifactKey::Sanitized)?;
        let artifact = write_locked_artifact(&target, applied.text.as_bytes())?;
        let artifact = self.record(document, ArtifactKey::Sanitized, artifact).await?;

        let listing = list_headings(&applied.text);
        let titles_target = self.target(document, ArtifactKey::SanitizedTitles)?;
        let titles = write_artifact(&titles_target, listing.as_bytes())?;
        self.record(document, ArtifactKey::SanitizedTitles, titles).await?;

        let toc = build_toc(&applied.text);
        self.storage.update_toc(&document.id, Some(&toc)).await?;
        let headings = listing.lines().count();
        document.toc = Some(toc);

        info!(
            changed = applied.changed,
            headings,
            hash = %artifact.hash,
            "sanitized document written"
        );
        Ok(SanitizeReport {
            artifact,
            changed: applied.changed,
            out_of_range: applied.out_of_range,
            headings,
        })
    }

    /// `sanitized` → `S.vec_suggestions.json`, pinned to the sanitized file's hash.
    #[instrument(skip_all, fields(doc = %document.id))]
    pub async fn suggest_vec(
        &self,
        document: &mut Document,
        chunking: &ChunkingConfig,
        force: bool,
    ) -> Result<SuggestVecReport> {
        gate::admit(document, "suggest-vec", &[ArtifactKey::Sanitized], force)?;
        let text = registry::read_text(approved(document, ArtifactKey::Sanitized)?)?;

        let suggestions = VecSuggestions::new(
            hash_bytes(text.as_bytes()),
            chunker::suggest_lines(&text, chunking.min_words),
        );
        let lines = suggestions.lines.len();

        let target = self.target(document, ArtifactKey::VecSuggestions)?;
        let artifact = write_artifact(&target, suggestions.to_json()?.as_bytes())?;
        let artifact = self.record(document, ArtifactKey::VecSuggestions, artifact).await?;
        Ok(SuggestVecReport { artifact, lines })
    }

    /// Replace the document's chunks with a fresh split of `sanitized`.
    ///
    /// Every chunk records the hash of the bytes it was cut from, and the old
    /// set is only dropped once the new one is fully stored.
    #[instrument(skip_all, fields(doc = %document.id))]
    pub async fn chunk(
        &self,
        document: &Document,
        chunking: &ChunkingConfig,
        force: bool,
    ) -> Result<ChunkReport> {
        gate::admit(document, "chunk", &[ArtifactKey::Sanitized], force)?;
        let sanitized = approved(document, ArtifactKey::Sanitized)?;
        let text = registry::read_text(sanitized)?;
        let current = hash_bytes(text.as_bytes());

        let suggestions = match document.artifacts.get(ArtifactKey::VecSuggestions) {
            Some(artifact) => {
                gate::check_freshness(artifact, force)?;
                let loaded = VecSuggestions::load(&artifact.path)?;
                if loaded.target_hash == current {
                    Some(loaded)
                } else if force {
                    warn!(
                        stored = %loaded.target_hash,
                        %current,
                        "vectorization suggestions are stale; ignoring them because of --force"
                    );
                    None
                } else {
                    return Err(FolioError::HashMismatch {
                        path: sanitized.path.clone(),
                        stored: loaded.target_hash,
                        current,
                    });
                }
            }
            None => None,
        };

        let mut report = ChunkReport {
            used_suggestions: suggestions.is_some(),
            ..ChunkReport::default()
        };
        let mut chunks = Vec::new();
        let mut parent: Option<usize> = None;

        for piece in chunker::split(&text) {
            let (chunk_parent, vector_status) = match piece.kind {
                PieceKind::Heading => {
                    parent = Some(chunks.len());
                    report.headings += 1;
                    (None, VectorStatus::NoVec)
                }
                PieceKind::Content => {
                    let status = chunker::schedule(
                        &piece,
                        parent.is_some(),
                        chunking.min_words,
                        suggestions.as_ref(),
                    );
                    report.content += 1;
                    if status == VectorStatus::ToVec {
                        report.scheduled += 1;
                    }
                    (parent, status)
                }
            };

            chunks.push(NewChunk {
                parent: chunk_parent,
                source_line: piece.first_line,
                content: piece.text,
                vector_status,
            });
        }

        self.storage
            .replace_chunks(&document.id, &current, &chunks)
            .await?;

        info!(
            headings = report.headings,
            content = report.content,
            scheduled = report.scheduled,
            "document chunked"
        );
        Ok(report)
    }

    /// Embed the document's eligible chunks.
    ///
    /// Chunks cut from a sanitized file other than the recorded one are a hash
    /// mismatch unless `force` is set. With `retry_errors`, chunks in `vec_err`
    /// are rescheduled first.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(doc = %document.id))]
    pub async fn vectorize(
        &self,
        document: &Document,
        config: &VectorizeConfig,
        embedder: &mut dyn Embedder,
        retry_errors: bool,
        force: bool,
        cancel: &AtomicBool,
        progress: &dyn ProgressReporter,
    ) -> Result<VectorizeReport> {
        gate::admit(document, "vectorize", &[ArtifactKey::Sanitized], force)?;
        let sanitized = approved(document, ArtifactKey::Sanitized)?;
        for stored in self.storage.chunk_source_hashes(&document.id).await? {
            if stored == sanitized.hash {
                continue;
            }
            let mismatch = FolioError::HashMismatch {
                path: sanitized.path.clone(),
                stored,
                current: sanitized.hash.clone(),
            };
            if !force {
                return Err(mismatch);
            }
            warn!(%mismatch, "chunks were cut from another sanitized file; continuing because of --force");
        }
        progress.phase("Embedding chunks");

        let report = if retry_errors {
            vectorize::rerun_errors(&self.storage, &document.id, config, embedder, cancel, progress)
                .await?
        } else {
            vectorize::run(&self.storage, &document.id, config, embedder, cancel, progress).await?
        };

        progress.done(&format!(
            "{} embedded, {} failed in {} batches",
            report.embedded, report.failed, report.batches
        ));
        Ok(report)
    }

    /// Freshness of every recorded artifact plus chunk counts.
    pub async fn status(&self, document: &Document) -> Result<StatusReport> {
        let mut artifacts = Vec::with_capacity(document.artifacts.len());
        for (key, artifact) in document.artifacts.iter() {
            artifacts.push((key, artifact.clone(), Freshness::of(artifact)?));
        }
        let chunks = self.storage.count_chunks_by_status(&document.id).await?;
        Ok(StatusReport { artifacts, chunks })
    }

    /// Delete a document, its chunks, and every derived file it references.
    ///
    /// The original source file is left in place. Returns the number of files removed.
    #[instrument(skip_all, fields(doc = %document.id))]
    pub async fn remove(&self, document: &Document) -> Result<usize> {
        let mut removed = 0;
        for (key, artifact) in document.artifacts.iter() {
            if key == ArtifactKey::OriginalFile {
                continue;
            }
            if artifact.path.exists() {
                removed += 1;
            }
            remove_artifact(&artifact.path)?;
        }
        self.storage.delete_document(&document.id).await?;

        // Only succeeds once the directory is empty.
        let _ = std::fs::remove_dir(self.paths(document).dir());

        info!(removed, "document removed");
        Ok(removed)
    }

    async fn record(
        &self,
        document: &mut Document,
        key: ArtifactKey,
        artifact: ArtifactRef,
    ) -> Result<ArtifactRef> {
        registry::set(&self.storage, document, key, artifact.clone()).await?;
        info!(key = %key, path = %artifact.path.display(), "artifact recorded");
        Ok(artifact)
    }
}

/// An artifact the gate has already required.
fn approved(document: &Document, key: ArtifactKey) -> Result<&ArtifactRef> {
    registry::get(document, key).ok_or_else(|| FolioError::MissingPrerequisite {
        stage: key.producer().to_string(),
        missing: vec![key],
    })
}
