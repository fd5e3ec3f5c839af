//! Loader configuration
//!
//! An explicit, immutable configuration value: produced once (defaults,
//! a JSON file, or CLI overrides) and passed by reference into each
//! dataset construction. There is no process-wide mutable settings
//! object to merge into or refresh.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::{LoaderError, Result};

fn default_local_dir() -> PathBuf {
    PathBuf::from("./datasets")
}

fn default_global_dir() -> PathBuf {
    PathBuf::from("./datasets/global")
}

fn default_ext() -> String {
    ".pba".to_string()
}

fn default_base_url() -> String {
    "https://huggingface.co/datasets/thuerey-group/pbdl-dataset/resolve/main".to_string()
}

fn default_index_cache() -> PathBuf {
    PathBuf::from("./datasets/global_index.json")
}

/// Resolved loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Directory scanned for locally managed archives
    #[serde(default = "default_local_dir")]
    pub local_datasets_dir: PathBuf,

    /// Directory downloaded archives are stored in
    #[serde(default = "default_global_dir")]
    pub global_datasets_dir: PathBuf,

    /// Archive file extension, including the dot
    #[serde(default = "default_ext")]
    pub dataset_ext: String,

    /// Base URL of the remote dataset repository
    #[serde(default = "default_base_url")]
    pub repo_base_url: String,

    /// Where the remote index is cached for offline access
    #[serde(default = "default_index_cache")]
    pub index_cache_path: PathBuf,

    /// Skip all network access; only local and cached data are visible
    #[serde(default)]
    pub offline: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            local_datasets_dir: default_local_dir(),
            global_datasets_dir: default_global_dir(),
            dataset_ext: default_ext(),
            repo_base_url: default_base_url(),
            index_cache_path: default_index_cache(),
            offline: false,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from a JSON file; absent keys fall back to
    /// defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&content)
            .map_err(|e| LoaderError::Config(format!("invalid configuration file: {e}")))
    }

    /// Path a named local archive would live at
    pub fn local_path(&self, name: &str) -> PathBuf {
        self.local_datasets_dir
            .join(format!("{}{}", name, self.dataset_ext))
    }

    /// Path a named downloaded archive lives at
    pub fn global_path(&self, name: &str) -> PathBuf {
        self.global_datasets_dir
            .join(format!("{}{}", name, self.dataset_ext))
    }
}
