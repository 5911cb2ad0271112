//! Optional TOML configuration loaded from the user's config directory.
//!
//! Every field has a CLI flag counterpart; flags win over the file, the
//! file wins over the built-in defaults. A missing file is not an error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::DEFAULT_BATCH_SIZE;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Catalog XML document to ingest when `init` is run without a path.
    pub source_path: Option<PathBuf>,
    /// Database location override.
    pub db_path: Option<PathBuf>,
    /// Records per ingestion transaction.
    pub batch_size: Option<usize>,
}

impl Config {
    /// Read the config file if present; an absent file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }
}

/// `~/.config/ccs/config.toml` (platform equivalent).
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("com", "cost-catalog-search", "ccs")
        .expect("project dirs available")
        .config_dir()
        .join("config.toml")
}
