//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.nupat/config.json`) and environment.
//! Every field has a default, so a missing file or `{}` is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "https://nupatai.onrender.com";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend API settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Where local client state (history snapshot, token) lives.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Backend base URL and request timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL of the chat API (default https://nupatai.onrender.com). Overridden by NUPAT_API_URL env.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds (default 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Local storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Override the data directory. Relative paths are resolved against the config file's parent. Omit to use `data` next to the config file.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Resolve the backend base URL: env NUPAT_API_URL overrides config. Trailing slashes are trimmed.
pub fn resolve_base_url(config: &Config) -> String {
    std::env::var("NUPAT_API_URL")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .unwrap_or_else(|| config.backend.base_url.trim().to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("NUPAT_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".nupat").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or NUPAT_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the data directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Default data directory when no override is set: `data` subdirectory of the config file's parent.
pub fn data_dir(config_path: &Path) -> PathBuf {
    config_parent(config_path).join("data")
}

/// Resolve the data directory: uses `config.storage.directory` if set (relative paths resolved against the config file's parent), otherwise the default `data` subdirectory.
pub fn resolve_data_dir(config: &Config, config_path: &Path) -> PathBuf {
    match &config.storage.directory {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                config_parent(config_path).join(d)
            }
        }
        _ => data_dir(config_path),
    }
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}
