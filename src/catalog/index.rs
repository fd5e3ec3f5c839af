//! Dataset catalog
//!
//! Merges two views: archives found in the local datasets directory, and
//! the remote repository index. The remote index is cached on disk; when
//! the network is unreachable the catalog degrades to the cached copy
//! with a warning instead of failing. A name found in neither view
//! resolves to `NotFound` carrying every known alternative.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::LoaderConfig;
use crate::utils::CatalogError;

/// One remote index entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Single-file archives are downloaded whole; partitioned archives
    /// are fetched one simulation at a time
    #[serde(rename = "isSingleFile", default)]
    pub single_file: bool,

    /// Number of simulation partitions (partitioned archives only)
    #[serde(rename = "numSims", default, skip_serializing_if = "Option::is_none")]
    pub num_sims: Option<usize>,

    /// Remaining published metadata, kept as-is
    #[serde(flatten)]
    pub meta: BTreeMap<String, Value>,
}

/// Where a resolved dataset lives
#[derive(Debug, Clone)]
pub enum DatasetSource {
    /// Already on disk in the local datasets directory
    Local(PathBuf),
    /// Published in the remote repository; must be fetched first
    Remote(IndexEntry),
}

/// Merged local + remote dataset catalog
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    local: BTreeMap<String, PathBuf>,
    remote: BTreeMap<String, IndexEntry>,
}

impl Catalog {
    /// Build the catalog: scan the local directory, then fetch (or fall
    /// back to the cached) remote index.
    pub fn load(config: &LoaderConfig) -> Result<Self, CatalogError> {
        let local = scan_local_dir(config)?;
        let remote = if config.offline {
            load_cached_index(config)
        } else {
            fetch_remote_index(config)
        };
        Ok(Self { local, remote })
    }

    /// Catalog over local archives only
    pub fn local_only(config: &LoaderConfig) -> Result<Self, CatalogError> {
        Ok(Self {
            local: scan_local_dir(config)?,
            remote: BTreeMap::new(),
        })
    }

    /// All known dataset names, local entries shadowing remote ones
    pub fn datasets(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .remote
            .keys()
            .chain(self.local.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Resolve a dataset name. Local archives take precedence over the
    /// remote index.
    pub fn resolve(&self, name: &str) -> Result<DatasetSource, CatalogError> {
        if let Some(path) = self.local.get(name) {
            return Ok(DatasetSource::Local(path.clone()));
        }
        if let Some(entry) = self.remote.get(name) {
            return Ok(DatasetSource::Remote(entry.clone()));
        }
        Err(CatalogError::NotFound {
            name: name.to_string(),
            known: self.datasets(),
        })
    }

    /// Remote entry for a name, if the index declares one
    pub fn remote_entry(&self, name: &str) -> Option<&IndexEntry> {
        self.remote.get(name)
    }
}

fn scan_local_dir(config: &LoaderConfig) -> Result<BTreeMap<String, PathBuf>, CatalogError> {
    let mut local = BTreeMap::new();
    let dir = &config.local_datasets_dir;
    if !dir.is_dir() {
        return Ok(local);
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(name) = file_name.strip_suffix(config.dataset_ext.as_str()) {
            if path.is_file() {
                local.insert(name.to_string(), path.clone());
            }
        }
    }
    Ok(local)
}

fn index_url(config: &LoaderConfig) -> String {
    format!("{}/index.json", config.repo_base_url.trim_end_matches('/'))
}

fn fetch_remote_index(config: &LoaderConfig) -> BTreeMap<String, IndexEntry> {
    let url = index_url(config);
    let fetched: Result<BTreeMap<String, IndexEntry>, String> = ureq::get(&url)
        .call()
        .map_err(|e| e.to_string())
        .and_then(|resp| resp.into_json().map_err(|e| e.to_string()));

    match fetched {
        Ok(index) => {
            // Cache for offline access; failure to cache is not fatal
            if let Some(parent) = config.index_cache_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Ok(payload) = serde_json::to_vec(&index) {
                if let Err(e) = std::fs::write(&config.index_cache_path, payload) {
                    warn!("Failed to cache dataset index: {e}");
                }
            }
            index
        }
        Err(reason) => {
            warn!("Failed to fetch global dataset index ({reason}). Check your internet connection.");
            load_cached_index(config)
        }
    }
}

fn load_cached_index(config: &LoaderConfig) -> BTreeMap<String, IndexEntry> {
    match std::fs::read(&config.index_cache_path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(index) => index,
            Err(e) => {
                warn!("Global index cache is corrupted ({e}). Global datasets will not be accessible.");
                BTreeMap::new()
            }
        },
        Err(_) => {
            warn!("Global index is not in cache. Global datasets will not be accessible.");
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> LoaderConfig {
        LoaderConfig {
            local_datasets_dir: dir.to_path_buf(),
            global_datasets_dir: dir.join("global"),
            index_cache_path: dir.join("global_index.json"),
            offline: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_scan_local_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wake-flow.pba"), b"stub").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"stub").unwrap();

        let catalog = Catalog::load(&config_in(dir.path())).unwrap();
        assert_eq!(catalog.datasets(), vec!["wake-flow"]);
        assert!(matches!(
            catalog.resolve("wake-flow").unwrap(),
            DatasetSource::Local(_)
        ));
    }

    #[test]
    fn test_offline_uses_cached_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(
            &config.index_cache_path,
            r#"{"cylinder-flow": {"isSingleFile": true}}"#,
        )
        .unwrap();

        let catalog = Catalog::load(&config).unwrap();
        assert_eq!(catalog.datasets(), vec!["cylinder-flow"]);
        assert!(matches!(
            catalog.resolve("cylinder-flow").unwrap(),
            DatasetSource::Remote(IndexEntry {
                single_file: true,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_name_lists_alternatives() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wake-flow.pba"), b"stub").unwrap();

        let catalog = Catalog::load(&config_in(dir.path())).unwrap();
        match catalog.resolve("wave-flow").unwrap_err() {
            CatalogError::NotFound { name, known } => {
                assert_eq!(name, "wave-flow");
                assert_eq!(known, vec!["wake-flow"]);
            }
            other => panic!("expected NotFound, got {other}"),
        }
    }

    #[test]
    fn test_corrupted_cache_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(&config.index_cache_path, "not json").unwrap();

        let catalog = Catalog::load(&config).unwrap();
        assert!(catalog.datasets().is_empty());
    }
}
