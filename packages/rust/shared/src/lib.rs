//! Shared types, error model, and configuration for folio.
//!
//! This crate is the foundation depended on by all other folio crates.
//! It provides:
//! - [`FolioError`]: the unified error type
//! - Domain types ([`Document`], [`ArtifactKey`], [`ArtifactRef`], [`ArtifactMap`], [`Chunk`])
//! - Configuration ([`AppConfig`], [`VectorizeConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BridgeConfig, ChunkingConfig, ChunkingSection, DefaultsConfig, OpenRouterConfig,
    VectorizeConfig, VectorizeSection, config_dir, config_file_path, expand_home, init_config,
    load_config, load_config_from, validate_api_key,
};
pub use error::{FolioError, Result};
pub use types::{
    ArtifactKey, ArtifactMap, ArtifactRef, Chunk, DocId, Document, NewChunk, Toc, TocEntry,
    VectorStatus,
};
