//! Application configuration for webharvest.
//!
//! User config lives at `~/.webharvest/webharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "webharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".webharvest";

// ---------------------------------------------------------------------------
// Config structs (matching webharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Crawl/discovery settings.
    #[serde(default)]
    pub crawl: CrawlSection,

    /// Pipeline collaborator naming and batching.
    #[serde(default)]
    pub pipeline: PipelineSection,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory for local pipeline state (databases and blobs).
    /// Defaults to `~/.webharvest/data` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// URL the frontier starts from. Required for the discovery stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,

    /// Prefix discovered links must carry. Defaults to `start_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Page budget for one discovery run.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Per-request timeout in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Worker pool size for the fetch stage.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Cap on pending records processed per fetch-stage run (0 = no cap).
    #[serde(default)]
    pub pending_limit: usize,

    /// Glob patterns for link paths the frontier must not follow.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            start_url: None,
            base_url: None,
            max_pages: default_max_pages(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            concurrency: default_concurrency(),
            pending_limit: 0,
            exclude_patterns: Vec::new(),
        }
    }
}

fn default_max_pages() -> usize {
    1000
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    4
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Vector index collection receiving text chunks.
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Blob bucket for extracted text artifacts.
    #[serde(default = "default_text_bucket")]
    pub text_bucket: String,

    /// Blob bucket for raw PDF artifacts.
    #[serde(default = "default_pdf_bucket")]
    pub pdf_bucket: String,

    /// Analytics dataset (maps to a local database file).
    #[serde(default = "default_dataset_id")]
    pub dataset_id: String,

    /// Analytics table receiving audit rows.
    #[serde(default = "default_table_id")]
    pub table_id: String,

    /// Documents per index write in the ingestion batcher.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Characters per chunk handed to the vector index.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            collection_name: default_collection_name(),
            text_bucket: default_text_bucket(),
            pdf_bucket: default_pdf_bucket(),
            dataset_id: default_dataset_id(),
            table_id: default_table_id(),
            batch_size: default_batch_size(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_collection_name() -> String {
    "webharvest".into()
}
fn default_text_bucket() -> String {
    "text".into()
}
fn default_pdf_bucket() -> String {
    "pdf".into()
}
fn default_dataset_id() -> String {
    "webharvest".into()
}
fn default_table_id() -> String {
    "audit".into()
}
fn default_batch_size() -> usize {
    100
}
fn default_chunk_size() -> usize {
    1024
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.webharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.webharvest/webharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the local data directory, honoring a configured override.
pub fn data_dir(config: &AppConfig) -> Result<PathBuf> {
    match &config.defaults.data_dir {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => Ok(config_dir()?.join("data")),
    }
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
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
