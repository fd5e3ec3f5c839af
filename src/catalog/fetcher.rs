//! Remote archive download and assembly
//!
//! Single-file archives are streamed straight into the global datasets
//! directory. Partitioned archives are published one simulation per
//! part; requested parts are fetched individually and merged with any
//! previously downloaded ones into a single local archive. Merging
//! rewrites the archive, so cached normalization attributes are not
//! carried over.

use std::io::Read;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::{debug, info};

use crate::archive::{sim_name, Container, ContainerWriter, ROOT_NS, SIM_PREFIX};
use crate::catalog::{Catalog, DatasetSource, IndexEntry};
use crate::config::LoaderConfig;
use crate::norm::NORM_ATTR_PREFIX;
use crate::utils::{CatalogError, Result};

const DOWNLOAD_CHUNK: usize = 64 * 1024;

/// Result of making a dataset locally available
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Archive path to open
    pub path: PathBuf,
    /// True when the archive file was created or rewritten
    pub modified: bool,
}

/// Make the named dataset available on disk, downloading it if needed.
///
/// `sel_sims` only matters for partitioned datasets, where it limits the
/// download to the requested simulations.
pub fn ensure_local(
    catalog: &Catalog,
    config: &LoaderConfig,
    name: &str,
    sel_sims: Option<&[usize]>,
    disable_progress: bool,
) -> Result<FetchOutcome> {
    match catalog.resolve(name)? {
        DatasetSource::Local(path) => Ok(FetchOutcome {
            path,
            modified: false,
        }),
        DatasetSource::Remote(entry) => {
            if entry.single_file {
                download_single_file(config, name, disable_progress)
            } else {
                download_parts(config, name, &entry, sel_sims, disable_progress)
            }
        }
    }
}

/// Download a single-file archive unless it is already present
pub fn download_single_file(
    config: &LoaderConfig,
    name: &str,
    disable_progress: bool,
) -> Result<FetchOutcome> {
    let target = config.global_path(name);
    if target.is_file() {
        debug!("Archive '{}' already downloaded", name);
        return Ok(FetchOutcome {
            path: target,
            modified: false,
        });
    }

    let url = format!(
        "{}/{}{}",
        config.repo_base_url.trim_end_matches('/'),
        name,
        config.dataset_ext
    );
    info!("Downloading dataset '{}'...", name);
    let bytes = http_get_bytes(&url, disable_progress)?;
    write_atomically(&target, &bytes)?;

    Ok(FetchOutcome {
        path: target,
        modified: true,
    })
}

/// Download missing simulation parts and merge them into the local
/// archive. Returns `modified: false` when every requested simulation is
/// already present.
pub fn download_parts(
    config: &LoaderConfig,
    name: &str,
    entry: &IndexEntry,
    sel_sims: Option<&[usize]>,
    disable_progress: bool,
) -> Result<FetchOutcome> {
    let num_sims = entry.num_sims.ok_or_else(|| {
        CatalogError::IndexDecode(format!(
            "partitioned dataset '{name}' does not declare a simulation count"
        ))
    })?;

    let mut wanted: Vec<usize> = match sel_sims {
        Some(sims) => sims.to_vec(),
        None => (0..num_sims).collect(),
    };
    wanted.sort_unstable();
    wanted.dedup();
    if let Some(&bad) = wanted.iter().find(|&&i| i >= num_sims) {
        return Err(CatalogError::IndexDecode(format!(
            "requested simulation {bad} but '{name}' only has {num_sims}"
        ))
        .into());
    }

    let target = config.global_path(name);
    let existing = if target.is_file() {
        Some(Container::open(&target)?)
    } else {
        None
    };
    let present: Vec<String> = existing
        .as_ref()
        .map(|c| {
            c.list_members(SIM_PREFIX)
                .into_iter()
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let missing: Vec<usize> = wanted
        .iter()
        .copied()
        .filter(|&i| !present.iter().any(|m| m == &sim_name(i)))
        .collect();
    if missing.is_empty() {
        debug!("All requested simulations of '{}' already downloaded", name);
        return Ok(FetchOutcome {
            path: target,
            modified: false,
        });
    }

    let base = config.repo_base_url.trim_end_matches('/');

    // Published metadata for the whole dataset
    let meta_url = format!("{base}/{name}/meta_all.json");
    let meta_bytes = http_get_bytes(&meta_url, true)?;
    let meta: serde_json::Map<String, Value> =
        serde_json::from_slice(&meta_bytes).map_err(|e| {
            CatalogError::IndexDecode(format!("invalid metadata for '{name}': {e}"))
        })?;

    info!(
        "Downloading {} simulation(s) of dataset '{}'...",
        missing.len(),
        name
    );
    let mut parts = Vec::with_capacity(missing.len());
    for &sim in &missing {
        let part_url = format!("{base}/{name}/sim{sim}{}", config.dataset_ext);
        let bytes = http_get_bytes(&part_url, disable_progress)?;
        let staging = target.with_extension(format!("sim{sim}.part"));
        std::fs::write(&staging, &bytes).map_err(CatalogError::Io)?;
        let decoded = read_partition(&staging, &part_url);
        let _ = std::fs::remove_file(&staging);
        let (array, attrs) = decoded?;
        parts.push((sim, array, attrs));
    }

    let writer = merge_parts(existing.as_ref(), &meta, parts)?;
    write_container_atomically(&writer, &target)?;
    Ok(FetchOutcome {
        path: target,
        modified: true,
    })
}

/// Assemble the merged archive from previously downloaded simulations and
/// freshly fetched parts.
///
/// Simulation arrays and their constants are carried over; cached
/// normalization attributes are not, since the merged archive has a new
/// simulation population. `meta` overrides any carried root attributes.
fn merge_parts(
    existing: Option<&Container>,
    meta: &serde_json::Map<String, Value>,
    parts: Vec<(usize, ndarray::ArrayD<f32>, serde_json::Map<String, Value>)>,
) -> Result<ContainerWriter> {
    let mut writer = ContainerWriter::new();

    if let Some(existing) = existing {
        for member in existing.list_members(SIM_PREFIX) {
            let member = member.to_string();
            writer.add_array(&member, existing.read_array(&member)?)?;
            if let Some(attrs) = existing.attrs(&member) {
                for (key, value) in attrs {
                    writer.set_attr(&member, key, value.clone());
                }
            }
        }
        if let Some(attrs) = existing.attrs(ROOT_NS) {
            for (key, value) in attrs {
                if !key.starts_with(NORM_ATTR_PREFIX) {
                    writer.set_attr(ROOT_NS, key, value.clone());
                }
            }
        }
    }

    for (key, value) in meta {
        writer.set_attr(ROOT_NS, key, value.clone());
    }

    for (sim, array, attrs) in parts {
        writer.add_array(&sim_name(sim), array)?;
        for (key, value) in attrs {
            writer.set_attr(&sim_name(sim), &key, value);
        }
    }

    Ok(writer)
}

/// Decode a downloaded part file, which must hold exactly one simulation.
/// Returns the simulation data and its attributes (the constants).
fn read_partition(
    path: &Path,
    url: &str,
) -> Result<(ndarray::ArrayD<f32>, serde_json::Map<String, Value>)> {
    let part = Container::open(path)?;
    let members: Vec<String> = part
        .list_members(SIM_PREFIX)
        .into_iter()
        .map(str::to_string)
        .collect();
    if members.len() != 1 {
        return Err(CatalogError::InvalidPartition(url.to_string(), members.len()).into());
    }
    let array = part.read_array(&members[0])?;
    let attrs = part.attrs(&members[0]).cloned().unwrap_or_default();
    Ok((array, attrs))
}

fn http_get_bytes(url: &str, disable_progress: bool) -> std::result::Result<Vec<u8>, CatalogError> {
    let failed = |reason: String| CatalogError::FetchFailed {
        url: url.to_string(),
        reason,
    };

    let response = ureq::get(url).call().map_err(|e| failed(e.to_string()))?;
    let total: Option<u64> = response
        .header("Content-Length")
        .and_then(|v| v.parse().ok());

    let pb = if disable_progress {
        ProgressBar::hidden()
    } else {
        match total {
            Some(len) => {
                let pb = ProgressBar::new(len);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template(
                            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
                        )
                        .unwrap()
                        .progress_chars("#>-"),
                );
                pb
            }
            None => ProgressBar::new_spinner(),
        }
    };

    let mut reader = response.into_reader();
    let mut body = match total {
        Some(len) => Vec::with_capacity(len as usize),
        None => Vec::new(),
    };
    let mut chunk = vec![0u8; DOWNLOAD_CHUNK];
    loop {
        let n = reader.read(&mut chunk).map_err(|e| failed(e.to_string()))?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
        pb.inc(n as u64);
    }
    pb.finish_and_clear();
    Ok(body)
}

fn write_atomically(target: &Path, bytes: &[u8]) -> std::result::Result<(), CatalogError> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let staging = target.with_extension("part");
    std::fs::write(&staging, bytes)?;
    std::fs::rename(&staging, target)?;
    Ok(())
}

fn write_container_atomically(writer: &ContainerWriter, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(CatalogError::Io)?;
    }
    let staging = target.with_extension("part");
    writer.write(&staging)?;
    std::fs::rename(&staging, target).map_err(CatalogError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    #[test]
    fn test_read_partition_rejects_multi_sim_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.pba");

        let mut writer = ContainerWriter::new();
        let arr = ArrayD::<f32>::zeros(vec![2, 1, 4]);
        writer.add_array(&sim_name(0), arr.clone()).unwrap();
        writer.add_array(&sim_name(1), arr).unwrap();
        writer.write(&path).unwrap();

        let err = read_partition(&path, "http://example/part").unwrap_err();
        assert!(err.to_string().contains("exactly one simulation"));
    }

    #[test]
    fn test_read_partition_extracts_the_simulation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.pba");

        let mut writer = ContainerWriter::new();
        let arr = ArrayD::<f32>::from_elem(vec![3, 2, 4], 1.5);
        writer.add_array(&sim_name(7), arr.clone()).unwrap();
        writer.set_attr(&sim_name(7), "Const1", serde_json::json!(0.25));
        writer.write(&path).unwrap();

        let (decoded, attrs) = read_partition(&path, "http://example/part").unwrap();
        assert_eq!(decoded, arr);
        assert_eq!(attrs.get("Const1"), Some(&serde_json::json!(0.25)));
    }

    #[test]
    fn test_merge_drops_norm_cache_but_keeps_constants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.pba");

        // Previously downloaded archive with a populated statistics cache
        let mut writer = ContainerWriter::new();
        let arr = ArrayD::<f32>::from_elem(vec![3, 2, 4], 1.0);
        writer.add_array(&sim_name(0), arr.clone()).unwrap();
        writer.set_attr(&sim_name(0), "Const1", serde_json::json!(0.5));
        writer.set_attr(ROOT_NS, "PDE", serde_json::json!("old name"));
        writer.set_attr(
            ROOT_NS,
            &format!("{NORM_ATTR_PREFIX}std:all"),
            serde_json::json!({"fields": {}}),
        );
        writer.write(&path).unwrap();
        let existing = Container::open(&path).unwrap();

        let mut meta = serde_json::Map::new();
        meta.insert("PDE".to_string(), serde_json::json!("wake flow"));

        let mut part_attrs = serde_json::Map::new();
        part_attrs.insert("Const1".to_string(), serde_json::json!(0.75));
        let parts = vec![(2usize, ArrayD::<f32>::from_elem(vec![3, 2, 4], 2.0), part_attrs)];

        let merged_path = dir.path().join("merged.pba");
        let merged = merge_parts(Some(&existing), &meta, parts).unwrap();
        merged.write(&merged_path).unwrap();

        let merged = Container::open(&merged_path).unwrap();
        assert_eq!(
            merged.list_members(SIM_PREFIX),
            vec!["sims/sim0", "sims/sim2"]
        );
        // Carried and new constants survive
        assert_eq!(
            merged.get_attr(&sim_name(0), "Const1"),
            Some(&serde_json::json!(0.5))
        );
        assert_eq!(
            merged.get_attr(&sim_name(2), "Const1"),
            Some(&serde_json::json!(0.75))
        );
        // Published metadata wins over the carried copy
        assert_eq!(
            merged.get_attr(ROOT_NS, "PDE"),
            Some(&serde_json::json!("wake flow"))
        );
        // The statistics cache does not survive the rewrite
        let root = merged.attrs(ROOT_NS).unwrap();
        assert!(!root.keys().any(|k| k.starts_with(NORM_ATTR_PREFIX)));
    }

    #[test]
    fn test_single_file_skips_existing_download() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoaderConfig {
            global_datasets_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        std::fs::write(config.global_path("wake-flow"), b"stub").unwrap();

        // No network access happens when the file is already present
        let outcome = download_single_file(&config, "wake-flow", true).unwrap();
        assert!(!outcome.modified);
        assert_eq!(outcome.path, config.global_path("wake-flow"));
    }
}
