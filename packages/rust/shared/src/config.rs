//! Application configuration for docforest.
//!
//! Lookup order: an explicit `--config` path, `./docforest.toml`, then
//! `~/.docforest/docforest.toml`. CLI flags override config file values,
//! which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DocForestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docforest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docforest";

// ---------------------------------------------------------------------------
// Config structs (matching docforest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Input manifest and artifact locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Worker counts per stage.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Object store access.
    #[serde(default)]
    pub blob: BlobConfig,

    /// Markup normalization options.
    #[serde(default)]
    pub markup: MarkupConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Manifest CSV (`AssetId, FileType, BucketName, Key`).
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,

    /// Root of the raw-document store, normalized-tree store and relation files.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            artifacts_dir: default_artifacts_dir(),
        }
    }
}

fn default_manifest() -> PathBuf {
    PathBuf::from("export.csv")
}
fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("Artifacts")
}

/// `[workers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_workers")]
    pub fetch: usize,

    #[serde(default = "default_workers")]
    pub normalize: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            fetch: default_workers(),
            normalize: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    10
}

/// Which object store implementation serves `(bucket, key)` lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobKind {
    /// Authenticated S3 `GetObject`, credentials from the standard AWS chain.
    #[default]
    S3,
    /// Anonymous path-style HTTP gateway: `GET {endpoint}/{bucket}/{key}`.
    Http,
    /// Local mirror: `{local_root}/{bucket}/{key}`.
    Local,
}

/// `[blob]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    #[serde(default)]
    pub kind: BlobKind,

    /// AWS region for the S3 store.
    #[serde(default = "default_region")]
    pub region: String,

    /// Gateway base URL: required for `http`, optional S3-compatible
    /// endpoint (path-style) for `s3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Root directory of a local mirror.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_root: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            kind: BlobKind::default(),
            region: default_region(),
            endpoint: None,
            local_root: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// How node ids are produced during annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeIdStrategy {
    /// Fresh random id per node per run.
    #[default]
    Random,
    /// Derived from (asset id, positional path); stable across runs.
    Deterministic,
}

/// `[markup]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkupConfig {
    #[serde(default)]
    pub node_ids: NodeIdStrategy,

    /// Retry with an HTML5 parser when the tolerant tokenizer gives up.
    #[serde(default)]
    pub html5_fallback: bool,
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub manifest: PathBuf,
    pub artifacts_dir: PathBuf,
    pub fetch_workers: usize,
    pub normalize_workers: usize,
    pub node_ids: NodeIdStrategy,
    pub html5_fallback: bool,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            manifest: config.paths.manifest.clone(),
            artifacts_dir: config.paths.artifacts_dir.clone(),
            fetch_workers: config.workers.fetch.max(1),
            normalize_workers: config.workers.normalize.max(1),
            node_ids: config.markup.node_ids,
            html5_fallback: config.markup.html5_fallback,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the user config directory (`~/.docforest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocForestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the user config file (`~/.docforest/docforest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config. An explicit path must exist; otherwise the
/// working directory and then the user config file are tried, falling back to
/// defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return load_config_from(path);
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return load_config_from(&local);
    }

    let path = config_file_path()?;
    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocForestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DocForestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the user config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocForestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| DocForestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocForestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
