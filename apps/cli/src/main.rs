//! folio CLI: fingerprinted document ingestion.
//!
//! Registers source documents, converts and sanitizes them, and tracks every
//! derived artifact by content hash through chunking and embedding.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
