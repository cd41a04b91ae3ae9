//! Chunk vectorization: batched, resumable embedding of eligible chunks.
//!
//! Each batch is selected in chunk-id order, embedded with one provider call,
//! and committed in a single transaction before the next batch is selected.
//! A run that stops early leaves every uncommitted chunk in `to_vec`, where
//! the next run picks it up again.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, instrument, warn};

use folio_shared::{Chunk, DocId, FolioError, Result, VectorizeConfig};
use folio_storage::{ChunkOutcome, Storage};

use crate::pipeline::ProgressReporter;

/// Embedding provider: one call per batch, all-or-nothing.
///
/// Must return exactly one vector per input text, in input order.
pub trait Embedder {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Summary of one vectorization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorizeReport {
    /// Batches committed.
    pub batches: usize,
    pub embedded: usize,
    pub failed: usize,
    /// Chunks moved from `vec_err` back to `to_vec` before the run.
    pub retried: usize,
    /// Set when the run stopped on the cancellation flag.
    pub cancelled: bool,
}

/// Embed every eligible chunk of `work_id`, batch by batch.
///
/// Stops when nothing eligible is left, after `config.max_batches` committed
/// batches, or when `cancel` is set. A cancellation noticed after the provider
/// call discards that batch without committing it.
#[instrument(skip_all, fields(doc = %work_id, batch_size = config.batch_size))]
pub async fn run(
    storage: &Storage,
    work_id: &DocId,
    config: &VectorizeConfig,
    embedder: &mut dyn Embedder,
    cancel: &AtomicBool,
    progress: &dyn ProgressReporter,
) -> Result<VectorizeReport> {
    config.validate()?;
    let mut report = VectorizeReport::default();

    loop {
        if cancel.load(Ordering::SeqCst) {
            report.cancelled = true;
            break;
        }
        if config.max_batches.is_some_and(|max| report.batches >= max) {
            info!(batches = report.batches, "batch limit reached");
            break;
        }

        let batch = storage
            .select_eligible_chunks(work_id, config.batch_size)
            .await?;
        if batch.is_empty() {
            break;
        }

        let outcomes = embed_batch(embedder, &batch, config.dimension);

        if cancel.load(Ordering::SeqCst) {
            warn!(chunks = batch.len(), "cancelled before commit, batch discarded");
            report.cancelled = true;
            break;
        }

        storage.commit_batch(&outcomes).await?;
        report.batches += 1;

        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, ChunkOutcome::Failed { .. }))
            .count();
        report.failed += failed;
        report.embedded += outcomes.len() - failed;

        progress.batch_committed(report.batches, outcomes.len() - failed, failed);
    }

    info!(
        batches = report.batches,
        embedded = report.embedded,
        failed = report.failed,
        cancelled = report.cancelled,
        "vectorization run finished"
    );
    Ok(report)
}

/// [`run`], after moving the document's errored chunks back to `to_vec`.
pub async fn rerun_errors(
    storage: &Storage,
    work_id: &DocId,
    config: &VectorizeConfig,
    embedder: &mut dyn Embedder,
    cancel: &AtomicBool,
    progress: &dyn ProgressReporter,
) -> Result<VectorizeReport> {
    let retried = storage.reset_errored_chunks(work_id).await? as usize;
    info!(retried, "errored chunks rescheduled");
    let mut report = run(storage, work_id, config, embedder, cancel, progress).await?;
    report.retried = retried;
    Ok(report)
}

/// Call the provider once and turn its answer into per-chunk outcomes.
fn embed_batch(embedder: &mut dyn Embedder, batch: &[Chunk], dimension: usize) -> Vec<ChunkOutcome> {
    let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();

    let vectors = match embedder.embed(&texts) {
        Ok(vectors) if vectors.len() == batch.len() => vectors,
        Ok(vectors) => {
            let error = format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            );
            warn!(%error, "batch failed");
            return fail_all(batch, &error);
        }
        Err(e) => {
            warn!(error = %e, "batch failed");
            return fail_all(batch, &e.to_string());
        }
    };

    batch
        .iter()
        .zip(vectors)
        .map(|(chunk, embedding)| match check_vector(&embedding, dimension) {
            Ok(()) => ChunkOutcome::Embedded {
                id: chunk.id,
                embedding,
            },
            Err(e) => {
                warn!(chunk = chunk.id, error = %e, "chunk failed");
                ChunkOutcome::Failed {
                    id: chunk.id,
                    error: e.to_string(),
                }
            }
        })
        .collect()
}

fn fail_all(batch: &[Chunk], error: &str) -> Vec<ChunkOutcome> {
    batch
        .iter()
        .map(|c| ChunkOutcome::Failed {
            id: c.id,
            error: error.to_string(),
        })
        .collect()
}

fn check_vector(embedding: &[f32], dimension: usize) -> Result<()> {
    if embedding.len() != dimension {
        return Err(FolioError::Embedding(format!(
            "expected {dimension} dimensions, got {}",
            embedding.len()
        )));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(FolioError::Embedding("embedding contains non-finite values".into()));
    }
    Ok(())
}
