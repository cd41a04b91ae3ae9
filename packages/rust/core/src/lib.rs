//! Core pipeline orchestration and domain logic for folio.
//!
//! This crate ties the artifact registry, the pipeline gate, heading
//! sanitization, chunking, and vectorization into the stages run by the CLI.

pub mod bridge;
pub mod chunker;
pub mod gate;
pub mod pipeline;
pub mod registry;
pub mod vectorize;

pub use bridge::{BridgeHandle, SuggestionProducer};
pub use gate::{
    Freshness, check_derivation, check_freshness, require_prerequisites, verify_freshness,
};
pub use pipeline::{
    ChunkReport, Pipeline, ProgressReporter, Registration, SanitizeOptions, SanitizeReport,
    SilentProgress, StatusReport, SuggestVecReport,
};
pub use vectorize::{Embedder, VectorizeReport};
