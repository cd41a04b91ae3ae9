//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use folio_artifacts::{hash_file, is_locked, lock, unlock};
use folio_core::{BridgeHandle, Pipeline, ProgressReporter, SanitizeOptions, StatusReport};
use folio_markdown::{BuiltinConverter, Dialect};
use folio_shared::{
    AppConfig, ChunkingConfig, Document, VectorStatus, VectorizeConfig, expand_home, init_config,
    load_config, validate_api_key,
};
use folio_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// folio: fingerprinted document ingestion.
#[derive(Parser)]
#[command(
    name = "folio",
    version,
    about = "Track source documents through conversion, heading sanitization, chunking, and embedding.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database file (overrides `defaults.database`).
    #[arg(long, env = "FOLIO_DATABASE", global = true)]
    pub database: Option<String>,

    /// Directory derived artifacts are written to (overrides `defaults.library_dir`).
    #[arg(long, env = "FOLIO_LIBRARY", global = true)]
    pub library: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Register a source file as a tracked document.
    Register {
        /// Source file (md, txt, html, or anything an external converter handles).
        file: PathBuf,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        author: Option<String>,
    },

    /// Convert the original file to markdown.
    Convert {
        /// Document ID or identity hash.
        #[arg(long)]
        doc: String,

        /// Continue past a changed source file.
        #[arg(long)]
        force: bool,
    },

    /// List the headings of the converted markdown.
    Titles {
        #[arg(long)]
        doc: String,

        #[arg(long)]
        force: bool,
    },

    /// Ask the bridge for a titles document.
    TocTitles {
        #[arg(long)]
        doc: String,

        #[arg(long)]
        force: bool,
    },

    /// Ask the bridge for heading-change suggestions.
    Suggest {
        #[arg(long)]
        doc: String,

        #[arg(long)]
        force: bool,
    },

    /// Apply heading changes and write the locked sanitized document.
    Sanitize {
        #[arg(long)]
        doc: String,

        /// Directive file to apply instead of the recorded suggestions.
        #[arg(long)]
        changes: Option<PathBuf>,

        /// Directive dialect: a (keyword, fenced) or b (sentinel).
        #[arg(long, default_value = "a")]
        dialect: Dialect,

        /// Continue past changed inputs.
        #[arg(long)]
        force: bool,
    },

    /// Record which sanitized lines are worth embedding.
    SuggestVec {
        #[arg(long)]
        doc: String,

        #[arg(long)]
        force: bool,
    },

    /// Split the sanitized document into chunks.
    Chunk {
        #[arg(long)]
        doc: String,

        /// Continue past a changed sanitized file or stale suggestions.
        #[arg(long)]
        force: bool,
    },

    /// Embed eligible chunks in batches.
    Vectorize {
        #[arg(long)]
        doc: String,

        /// Chunks per embedding call (overrides `vectorize.batch_size`).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Stop after this many batches.
        #[arg(long)]
        max_batches: Option<usize>,

        /// Reschedule chunks whose previous attempt failed.
        #[arg(long)]
        retry_errors: bool,

        #[arg(long)]
        force: bool,
    },

    /// Show artifact freshness and chunk counts for a document.
    Status {
        #[arg(long)]
        doc: String,
    },

    /// List registered documents.
    List,

    /// Delete a document, its chunks, and its derived files.
    Remove {
        #[arg(long)]
        doc: String,
    },

    /// Print the SHA-256 of a file.
    Hash { path: PathBuf },

    /// Make a file read-only.
    Lock { path: PathBuf },

    /// Restore owner write permission on a file.
    Unlock { path: PathBuf },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "folio=info",
        1 => "folio=debug",
        _ => "folio=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let overrides = Overrides {
        database: cli.database,
        library: cli.library,
    };

    match cli.command {
        Command::Register {
            file,
            title,
            author,
        } => cmd_register(&overrides, &file, title, author).await,
        Command::Convert { doc, force } => cmd_convert(&overrides, &doc, force).await,
        Command::Titles { doc, force } => cmd_titles(&overrides, &doc, force).await,
        Command::TocTitles { doc, force } => cmd_toc_titles(&overrides, &doc, force).await,
        Command::Suggest { doc, force } => cmd_suggest(&overrides, &doc, force).await,
        Command::Sanitize {
            doc,
            changes,
            dialect,
            force,
        } => {
            let options = SanitizeOptions {
                changes,
                dialect,
                force,
            };
            cmd_sanitize(&overrides, &doc, &options).await
        }
        Command::SuggestVec { doc, force } => cmd_suggest_vec(&overrides, &doc, force).await,
        Command::Chunk { doc, force } => cmd_chunk(&overrides, &doc, force).await,
        Command::Vectorize {
            doc,
            batch_size,
            max_batches,
            retry_errors,
            force,
        } => {
            cmd_vectorize(
                &overrides,
                &doc,
                batch_size,
                max_batches,
                retry_errors,
                force,
            )
            .await
        }
        Command::Status { doc } => cmd_status(&overrides, &doc).await,
        Command::List => cmd_list(&overrides).await,
        Command::Remove { doc } => cmd_remove(&overrides, &doc).await,
        Command::Hash { path } => cmd_hash(&path),
        Command::Lock { path } => cmd_lock(&path),
        Command::Unlock { path } => cmd_unlock(&path),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Global path overrides from flags or environment.
struct Overrides {
    database: Option<String>,
    library: Option<String>,
}

/// Load config and open the pipeline over the configured database.
async fn open_pipeline(overrides: &Overrides) -> Result<(AppConfig, Pipeline)> {
    open_with(overrides, false).await
}

/// Inspection commands never write to the database.
async fn open_inspection(overrides: &Overrides) -> Result<(AppConfig, Pipeline)> {
    open_with(overrides, true).await
}

async fn open_with(overrides: &Overrides, readonly: bool) -> Result<(AppConfig, Pipeline)> {
    let config = load_config()?;
    let database = expand_home(
        overrides
            .database
            .as_deref()
            .unwrap_or(&config.defaults.database),
    )?;
    let library = expand_home(
        overrides
            .library
            .as_deref()
            .unwrap_or(&config.defaults.library_dir),
    )?;

    let storage = if readonly {
        Storage::open_readonly(&database).await?
    } else {
        Storage::open(&database).await?
    };
    debug!(readonly, database = %database.display(), library = %library.display(), "pipeline opened");
    Ok((config, Pipeline::new(storage, library)))
}

// ---------------------------------------------------------------------------
// Stage commands
// ---------------------------------------------------------------------------

async fn cmd_register(
    overrides: &Overrides,
    file: &Path,
    title: Option<String>,
    author: Option<String>,
) -> Result<()> {
    let (_, pipeline) = open_pipeline(overrides).await?;
    let registration = pipeline.register(file, title, author).await?;
    let doc = &registration.document;

    if registration.created {
        println!("Registered {}", doc.id);
    } else {
        println!("Already registered as {}", doc.id);
    }
    println!("  Hash: {}", doc.identity_hash);
    println!("  Stem: {}", doc.stem);
    Ok(())
}

async fn cmd_convert(overrides: &Overrides, reference: &str, force: bool) -> Result<()> {
    let (_, pipeline) = open_pipeline(overrides).await?;
    let mut doc = pipeline.document(reference).await?;
    let artifact = pipeline.convert(&mut doc, &BuiltinConverter, force).await?;
    println!("Markdown written to {}", artifact.path.display());
    Ok(())
}

async fn cmd_titles(overrides: &Overrides, reference: &str, force: bool) -> Result<()> {
    let (_, pipeline) = open_pipeline(overrides).await?;
    let mut doc = pipeline.document(reference).await?;
    let artifact = pipeline.titles(&mut doc, force).await?;
    println!("Titles written to {}", artifact.path.display());
    Ok(())
}

async fn cmd_toc_titles(overrides: &Overrides, reference: &str, force: bool) -> Result<()> {
    let (config, pipeline) = open_pipeline(overrides).await?;
    validate_api_key(&config)?;
    let mut doc = pipeline.document(reference).await?;

    let spinner = CliProgress::new();
    spinner.phase("Extracting titles");
    let mut bridge = BridgeHandle::spawn(&config.bridge)?;
    let result = pipeline.toc_titles(&mut doc, &mut bridge, force).await;
    bridge.shutdown()?;
    spinner.done("");

    let artifact = result?;
    println!("TOC titles written to {}", artifact.path.display());
    Ok(())
}

async fn cmd_suggest(overrides: &Overrides, reference: &str, force: bool) -> Result<()> {
    let (config, pipeline) = open_pipeline(overrides).await?;
    validate_api_key(&config)?;
    let mut doc = pipeline.document(reference).await?;

    let spinner = CliProgress::new();
    spinner.phase("Suggesting heading changes");
    let mut bridge = BridgeHandle::spawn(&config.bridge)?;
    let result = pipeline.suggest(&mut doc, &mut bridge, force).await;
    bridge.shutdown()?;
    spinner.done("");

    let artifact = result?;
    println!("Heading changes written to {}", artifact.path.display());
    println!("Review them, then run `folio sanitize --doc {}`", doc.id);
    Ok(())
}

async fn cmd_sanitize(
    overrides: &Overrides,
    reference: &str,
    options: &SanitizeOptions,
) -> Result<()> {
    let (_, pipeline) = open_pipeline(overrides).await?;
    let mut doc = pipeline.document(reference).await?;
    let report = pipeline.sanitize(&mut doc, options).await?;

    println!("Sanitized document written to {}", report.artifact.path.display());
    println!("  Lines changed: {}", report.changed);
    println!("  Headings:      {}", report.headings);
    println!("  Hash:          {}", report.artifact.hash);
    if !report.out_of_range.is_empty() {
        println!("  Ignored directives past the end: {:?}", report.out_of_range);
    }
    Ok(())
}

async fn cmd_suggest_vec(overrides: &Overrides, reference: &str, force: bool) -> Result<()> {
    let (config, pipeline) = open_pipeline(overrides).await?;
    let mut doc = pipeline.document(reference).await?;
    let report = pipeline
        .suggest_vec(&mut doc, &ChunkingConfig::from(&config), force)
        .await?;
    println!(
        "{} lines suggested in {}",
        report.lines,
        report.artifact.path.display()
    );
    Ok(())
}

async fn cmd_chunk(overrides: &Overrides, reference: &str, force: bool) -> Result<()> {
    let (config, pipeline) = open_pipeline(overrides).await?;
    let doc = pipeline.document(reference).await?;
    let report = pipeline
        .chunk(&doc, &ChunkingConfig::from(&config), force)
        .await?;

    println!("Chunked {}", doc.id);
    println!("  Headings:  {}", report.headings);
    println!("  Content:   {}", report.content);
    println!("  Scheduled: {}", report.scheduled);
    if report.used_suggestions {
        println!("  (scheduled from vectorization suggestions)");
    }
    Ok(())
}

async fn cmd_vectorize(
    overrides: &Overrides,
    reference: &str,
    batch_size: Option<usize>,
    max_batches: Option<usize>,
    retry_errors: bool,
    force: bool,
) -> Result<()> {
    let (config, pipeline) = open_pipeline(overrides).await?;
    let doc = pipeline.document(reference).await?;

    let mut vectorize = VectorizeConfig::from(&config);
    if let Some(size) = batch_size {
        vectorize.batch_size = size;
    }
    vectorize.max_batches = max_batches;
    vectorize.validate()?;

    // Ctrl-C stops the run between batches.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current batch");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut bridge = BridgeHandle::spawn(&config.bridge)?;
    let progress = CliProgress::new();
    let result = pipeline
        .vectorize(
            &doc,
            &vectorize,
            &mut bridge,
            retry_errors,
            force,
            &cancel,
            &progress,
        )
        .await;
    bridge.shutdown()?;

    let report = result?;
    println!();
    println!("  Batches:  {}", report.batches);
    println!("  Embedded: {}", report.embedded);
    println!("  Failed:   {}", report.failed);
    if retry_errors {
        println!("  Retried:  {}", report.retried);
    }
    if report.cancelled {
        println!("  Interrupted; run again to continue.");
    }
    println!();
    Ok(())
}

async fn cmd_status(overrides: &Overrides, reference: &str) -> Result<()> {
    let (_, pipeline) = open_inspection(overrides).await?;
    let doc = pipeline.document(reference).await?;
    let status = pipeline.status(&doc).await?;
    print_document(&doc);
    print_status(&status);
    Ok(())
}

async fn cmd_list(overrides: &Overrides) -> Result<()> {
    let (_, pipeline) = open_inspection(overrides).await?;
    let documents = pipeline.list().await?;
    if documents.is_empty() {
        println!("No documents registered.");
        return Ok(());
    }
    for doc in &documents {
        println!(
            "{}  {}  {}  ({} artifacts)",
            doc.id,
            short_hash(&doc.identity_hash),
            doc.title.as_deref().unwrap_or(&doc.stem),
            doc.artifacts.len()
        );
    }
    Ok(())
}

async fn cmd_remove(overrides: &Overrides, reference: &str) -> Result<()> {
    let (_, pipeline) = open_pipeline(overrides).await?;
    let doc = pipeline.document(reference).await?;
    let removed = pipeline.remove(&doc).await?;
    println!("Removed {} and {removed} derived files", doc.id);
    Ok(())
}

// ---------------------------------------------------------------------------
// Fingerprint commands
// ---------------------------------------------------------------------------

fn cmd_hash(path: &Path) -> Result<()> {
    println!("{}  {}", hash_file(path)?, path.display());
    Ok(())
}

fn cmd_lock(path: &Path) -> Result<()> {
    lock(path)?;
    println!("Locked {}", path.display());
    Ok(())
}

fn cmd_unlock(path: &Path) -> Result<()> {
    unlock(path)?;
    println!(
        "Unlocked {} (read-only: {})",
        path.display(),
        is_locked(path)?
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

fn print_document(doc: &Document) {
    println!();
    println!("  Document: {}", doc.id);
    println!("  Identity: {}", doc.identity_hash);
    if let Some(title) = &doc.title {
        println!("  Title:    {title}");
    }
    if let Some(author) = &doc.author {
        println!("  Author:   {author}");
    }
    println!("  Updated:  {}", doc.updated_at.to_rfc3339());
}

fn print_status(status: &StatusReport) {
    println!();
    println!("  Artifacts:");
    for (key, artifact, freshness) in &status.artifacts {
        println!(
            "    {:<18} {:<8} {}  {}",
            key.as_str(),
            freshness.label(),
            short_hash(&artifact.hash),
            artifact.path.display()
        );
    }
    println!();
    println!("  Chunks:");
    for vector_status in VectorStatus::ALL {
        let count = status.chunks.get(&vector_status).copied().unwrap_or(0);
        println!("    {:<8} {count}", vector_status.as_str());
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn batch_committed(&self, batch: usize, embedded: usize, failed: usize) {
        self.spinner.set_message(format!(
            "Batch {batch} committed ({embedded} embedded, {failed} failed)"
        ));
    }

    fn done(&self, _summary: &str) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
