//! Application configuration for folio.
//!
//! User config lives at `~/.folio/folio.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FolioError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "folio.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".folio";

// ---------------------------------------------------------------------------
// Config structs (matching folio.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// External producer subprocess.
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    #[serde(default)]
    pub vectorize: VectorizeSection,

    #[serde(default)]
    pub chunking: ChunkingSection,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory derived artifacts are written to (`~` expanded).
    #[serde(default = "default_library_dir")]
    pub library_dir: String,

    /// Path of the libSQL database file (`~` expanded).
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            library_dir: default_library_dir(),
            database: default_database(),
        }
    }
}

fn default_library_dir() -> String {
    "~/folio-library".into()
}
fn default_database() -> String {
    "~/.folio/folio.db".into()
}

/// `[bridge]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Runtime used to launch the bridge script.
    #[serde(default = "default_bridge_command")]
    pub command: String,

    /// Bridge script, relative to `working_dir`.
    #[serde(default = "default_bridge_script")]
    pub script: String,

    /// Working directory for the bridge subprocess (defaults to the cwd).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Model identifier forwarded with every request.
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: default_bridge_command(),
            script: default_bridge_script(),
            working_dir: None,
            model: default_model(),
        }
    }
}

fn default_bridge_command() -> String {
    "bun".into()
}
fn default_bridge_script() -> String {
    "bridge/src/bridge.ts".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}

/// `[vectorize]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorizeSection {
    /// Chunks per embedding call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Expected embedding length.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for VectorizeSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            dimension: default_dimension(),
        }
    }
}

fn default_batch_size() -> usize {
    20
}
fn default_dimension() -> usize {
    384
}

/// `[chunking]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingSection {
    /// Content chunks with fewer words are never scheduled for embedding.
    #[serde(default = "default_min_words")]
    pub min_words: usize,
}

impl Default for ChunkingSection {
    fn default() -> Self {
        Self {
            min_words: default_min_words(),
        }
    }
}

fn default_min_words() -> usize {
    8
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime vectorization settings.
#[derive(Debug, Clone)]
pub struct VectorizeConfig {
    pub batch_size: usize,
    pub dimension: usize,
    /// Stop after this many committed batches.
    pub max_batches: Option<usize>,
}

impl VectorizeConfig {
    /// Reject settings that would make a run loop forever or accept nothing.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(FolioError::config("vectorize.batch_size must be at least 1"));
        }
        if self.dimension == 0 {
            return Err(FolioError::config("vectorize.dimension must be at least 1"));
        }
        Ok(())
    }
}

impl From<&AppConfig> for VectorizeConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            batch_size: config.vectorize.batch_size,
            dimension: config.vectorize.dimension,
            max_batches: None,
        }
    }
}

/// Runtime chunking settings.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub min_words: usize,
}

impl From<&AppConfig> for ChunkingConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            min_words: config.chunking.min_words,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.folio/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| FolioError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.folio/folio.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FolioError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| FolioError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FolioError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FolioError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FolioError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix('~') {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| FolioError::config("could not determine home directory"))?;
            Ok(home.join(rest.trim_start_matches(['/', '\\'])))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Check that the API key env var the bridge relies on is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(FolioError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}
