//! Structural validation of a loaded archive
//!
//! Runs once at dataset construction, before any sample can be served.
//! Every check failure is fatal: an inconsistent archive would silently
//! corrupt training data, so nothing here is retried or recovered.

use super::container::Container;
use super::metadata::ArchiveMetadata;
use crate::utils::CorruptionError;

/// Prefix under which simulation arrays are stored
pub const SIM_PREFIX: &str = "sims/sim";

/// Array name for simulation `idx`
pub fn sim_name(idx: usize) -> String {
    format!("{}{}", SIM_PREFIX, idx)
}

/// Validated structural summary of an archive
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    /// Simulation array names, ordered by simulation id
    pub sim_names: Vec<String>,
    /// Absolute simulation ids, parallel to `sim_names`. Partitioned
    /// downloads keep the published ids, so the ids present in an archive
    /// are not necessarily contiguous or zero-based.
    pub sim_ids: Vec<usize>,
    /// Shape shared by every simulation: (frames, fields, spatial dims...)
    pub shape: Vec<usize>,
}

impl ArchiveLayout {
    pub fn num_sims(&self) -> usize {
        self.sim_names.len()
    }

    pub fn num_frames(&self) -> usize {
        self.shape[0]
    }

    pub fn num_fields(&self) -> usize {
        self.shape[1]
    }

    pub fn spatial_dims(&self) -> &[usize] {
        &self.shape[2..]
    }
}

/// Check structural consistency of a loaded archive.
///
/// Verifies:
/// - array rank >= 3 (frames, fields, at least one spatial axis)
/// - field scheme length equals the fields axis size
/// - every simulation's shape equals the first simulation's shape exactly
/// - every simulation defines all declared constants
pub fn validate(
    container: &Container,
    meta: &ArchiveMetadata,
) -> Result<ArchiveLayout, CorruptionError> {
    let mut sims: Vec<(usize, String)> = Vec::new();
    for member in container.list_members(SIM_PREFIX) {
        let id: usize = member[SIM_PREFIX.len()..]
            .parse()
            .map_err(|_| CorruptionError::MalformedSimName(member.to_string()))?;
        sims.push((id, member.to_string()));
    }
    // Storage order follows download order; ids give the canonical order
    sims.sort_unstable_by_key(|(id, _)| *id);
    let sim_ids: Vec<usize> = sims.iter().map(|(id, _)| *id).collect();
    let sim_names: Vec<String> = sims.into_iter().map(|(_, name)| name).collect();

    let first = sim_names.first().ok_or(CorruptionError::Empty)?;
    let shape: Vec<usize> = container
        .array_shape(first)
        .expect("listed member has a TOC entry")
        .to_vec();

    if shape.len() < 3 {
        return Err(CorruptionError::RankTooLow(shape.len()));
    }

    if meta.field_scheme.chars().count() != shape[1] {
        return Err(CorruptionError::FieldCountMismatch {
            meta: meta.field_scheme.chars().count(),
            actual: shape[1],
        });
    }

    for name in &sim_names {
        let sim_shape = container
            .array_shape(name)
            .expect("listed member has a TOC entry");
        if sim_shape != shape.as_slice() {
            return Err(CorruptionError::ShapeMismatch {
                sim: name.clone(),
                expected: shape,
                actual: sim_shape.to_vec(),
            });
        }

        let missing: Vec<String> = meta
            .constants
            .iter()
            .filter(|c| container.get_attr(name, c).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(CorruptionError::MissingConstants {
                sim: name.clone(),
                missing,
            });
        }
    }

    Ok(ArchiveLayout {
        sim_names,
        sim_ids,
        shape,
    })
}
