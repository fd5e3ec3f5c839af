//! Normalization engine
//!
//! Statistics-driven, reversible normalization of samples and constants.
//! Statistics are computed in a single streaming pass over every frame of
//! every simulation, cached as root attributes on the archive container
//! (keyed by strategy and constant selection), and turned into per-field
//! affine transforms at dataset construction.
//!
//! Degenerate fields (zero variance, or zero min-max range) use a
//! pass-through scale of 1.0: Std leaves such values untouched and MinMax
//! maps them to the lower bound of the target range. Both remain exactly
//! reversible.

pub mod stats;

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive::{ArchiveLayout, ArchiveMetadata, Container, ContainerRw, ROOT_NS};
use crate::utils::{ArchiveError, LoaderError, Result};
use stats::StreamingStats;

/// Attribute key prefix for cached normalization statistics
pub const NORM_ATTR_PREFIX: &str = "norm:";

/// Normalization strategy
///
/// A closed set of variants: there is no string-keyed dispatch, so a typo
/// cannot silently resolve to a no-op strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    /// `x / std` per field
    Std,
    /// `(x - mean) / std` per field
    MeanStd,
    /// Affine map of `[min, max]` onto a configurable target range
    MinMax { lo: f64, hi: f64 },
}

impl Strategy {
    /// Map the observed range onto `[-1, 1]`
    pub fn min_max_default() -> Self {
        Strategy::MinMax { lo: -1.0, hi: 1.0 }
    }

    /// Stable name used in cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Std => "std",
            Strategy::MeanStd => "mean-std",
            Strategy::MinMax { .. } => "min-max",
        }
    }
}

/// One scalar per field (or per constant) for each statistic a strategy needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatArrays {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Vec<f64>>,
}

impl StatArrays {
    fn lens_match(&self, expected: usize) -> bool {
        let check = |v: &Option<Vec<f64>>| v.as_ref().map(|v| v.len() == expected).unwrap_or(true);
        let any = self.mean.is_some() || self.std.is_some() || self.min.is_some() || self.max.is_some();
        any && check(&self.mean) && check(&self.std) && check(&self.min) && check(&self.max)
    }
}

/// Cached statistics payload stored under one `<strategy>:<signature>` key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormStats {
    pub fields: StatArrays,
    pub constants: StatArrays,
}

/// Signature identifying the constant selection statistics were computed for
pub fn selection_signature(sel_const: Option<&[usize]>) -> String {
    match sel_const {
        None => "all".to_string(),
        Some(indices) => {
            let mut sorted: Vec<usize> = indices.to_vec();
            sorted.sort_unstable();
            sorted
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(",")
        }
    }
}

/// Root-attribute key for a strategy/selection cache entry
pub fn cache_key(strategy: Strategy, sel_const: Option<&[usize]>) -> String {
    format!(
        "{}{}:{}",
        NORM_ATTR_PREFIX,
        strategy.as_str(),
        selection_signature(sel_const)
    )
}

/// Raw accumulators from one full pass over the archive
///
/// Field statistics cover the full field set (channel selection is a view
/// applied later, never a re-derivation of statistics); constant
/// statistics cover every declared constant in declaration order.
#[derive(Debug, Clone)]
pub struct ComputedStats {
    pub fields: Vec<StreamingStats>,
    pub constants: Vec<StreamingStats>,
}

impl ComputedStats {
    /// Extract the cacheable payload for one strategy and constant selection
    pub fn for_strategy(&self, strategy: Strategy, sel_const: Option<&[usize]>) -> NormStats {
        let const_indices: Vec<usize> = match sel_const {
            Some(sel) => sel.to_vec(),
            None => (0..self.constants.len()).collect(),
        };
        let pick = |f: &dyn Fn(&StreamingStats) -> f64| -> (Vec<f64>, Vec<f64>) {
            (
                self.fields.iter().map(|s| f(s)).collect(),
                const_indices.iter().map(|&i| f(&self.constants[i])).collect(),
            )
        };

        let mut out = NormStats::default();
        match strategy {
            Strategy::Std => {
                let (f, c) = pick(&StreamingStats::std);
                out.fields.std = Some(f);
                out.constants.std = Some(c);
            }
            Strategy::MeanStd => {
                let (f, c) = pick(&StreamingStats::mean);
                out.fields.mean = Some(f);
                out.constants.mean = Some(c);
                let (f, c) = pick(&StreamingStats::std);
                out.fields.std = Some(f);
                out.constants.std = Some(c);
            }
            Strategy::MinMax { .. } => {
                let (f, c) = pick(&StreamingStats::min);
                out.fields.min = Some(f);
                out.constants.min = Some(c);
                let (f, c) = pick(&StreamingStats::max);
                out.fields.max = Some(f);
                out.constants.max = Some(c);
            }
        }
        out
    }
}

/// Frames read per storage access during the statistics pass
const STATS_CHUNK_FRAMES: usize = 64;

/// Run the full-archive statistics pass: every frame of every simulation,
/// per field, plus every declared constant per simulation.
///
/// This is the only unbounded-duration operation in the crate; it has no
/// cancellation hook, so callers needing responsiveness run it out-of-band.
pub fn calculate(
    container: &Container,
    layout: &ArchiveLayout,
    meta: &ArchiveMetadata,
    disable_progress: bool,
) -> std::result::Result<ComputedStats, ArchiveError> {
    let mut fields = vec![StreamingStats::new(); layout.num_fields()];
    let mut constants = vec![StreamingStats::new(); meta.constants.len()];

    let pb = if disable_progress {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(layout.num_sims() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} sims ({msg})")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_message("computing normalization statistics");
        pb
    };

    for sim in &layout.sim_names {
        let frames = layout.num_frames();
        let mut start = 0;
        while start < frames {
            let end = (start + STATS_CHUNK_FRAMES).min(frames);
            let chunk = container.read_frames(sim, start, end)?;
            for frame in chunk.axis_iter(Axis(0)) {
                for (f, lane) in frame.axis_iter(Axis(0)).enumerate() {
                    let acc = &mut fields[f];
                    for &v in lane.iter() {
                        acc.push(v as f64);
                    }
                }
            }
            start = end;
        }

        for (c, name) in meta.constants.iter().enumerate() {
            let value = container
                .get_attr(sim, name)
                .and_then(|v| v.as_f64())
                .ok_or_else(|| {
                    ArchiveError::AttrDecode(format!("constant '{name}' of '{sim}' is not a number"))
                })?;
            constants[c].push(value);
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    debug!(
        fields = layout.num_fields(),
        constants = meta.constants.len(),
        "statistics pass complete"
    );
    Ok(ComputedStats { fields, constants })
}

/// Report whether a complete, matching cache entry exists for this
/// strategy and constant selection.
pub fn check_norm_data(
    container: &Container,
    strategy: Strategy,
    sel_const: Option<&[usize]>,
    num_fields: usize,
    num_sel_consts: usize,
) -> bool {
    match load(container, strategy, sel_const) {
        Some(cached) => {
            cached.fields.lens_match(num_fields) && cached.constants.lens_match(num_sel_consts)
        }
        None => false,
    }
}

/// Load a cached statistics payload, if present and decodable
pub fn load(
    container: &Container,
    strategy: Strategy,
    sel_const: Option<&[usize]>,
) -> Option<NormStats> {
    let value = container.get_attr(ROOT_NS, &cache_key(strategy, sel_const))?;
    serde_json::from_value(value.clone()).ok()
}

/// Persist a statistics payload under its strategy/selection key
pub fn persist(
    rw: &mut ContainerRw,
    strategy: Strategy,
    sel_const: Option<&[usize]>,
    stats: &NormStats,
) -> std::result::Result<(), ArchiveError> {
    let value = serde_json::to_value(stats).map_err(|e| ArchiveError::AttrDecode(e.to_string()))?;
    rw.set_attr(ROOT_NS, &cache_key(strategy, sel_const), value);
    rw.flush()
}

/// Remove every cached statistics entry. Returns the number removed.
pub fn clear_cache(rw: &mut ContainerRw) -> usize {
    rw.remove_attrs_with_prefix(ROOT_NS, NORM_ATTR_PREFIX)
}

/// Per-field affine transform derived from a strategy and its statistics
///
/// Every strategy reduces to `y = scale * x + offset` per field, which
/// makes the reverse transform exact up to floating-point rounding.
#[derive(Debug, Clone)]
pub struct Normalizer {
    scale: Vec<f64>,
    offset: Vec<f64>,
}

impl Normalizer {
    /// Build a normalizer from cached statistics for `strategy`.
    ///
    /// Fails if the payload is missing the arrays the strategy needs;
    /// callers are expected to have recomputed the cache first.
    pub fn from_stats(strategy: Strategy, stats: &StatArrays) -> Result<Self> {
        let missing =
            |what: &str| LoaderError::Config(format!("normalization cache is missing '{what}'"));

        let (scale, offset) = match strategy {
            Strategy::Std => {
                let std = stats.std.as_ref().ok_or_else(|| missing("std"))?;
                let scale: Vec<f64> = std
                    .iter()
                    .map(|&s| if s == 0.0 { 1.0 } else { 1.0 / s })
                    .collect();
                let offset = vec![0.0; scale.len()];
                (scale, offset)
            }
            Strategy::MeanStd => {
                let mean = stats.mean.as_ref().ok_or_else(|| missing("mean"))?;
                let std = stats.std.as_ref().ok_or_else(|| missing("std"))?;
                let scale: Vec<f64> = std
                    .iter()
                    .map(|&s| if s == 0.0 { 1.0 } else { 1.0 / s })
                    .collect();
                let offset = mean.iter().zip(&scale).map(|(&m, &a)| -m * a).collect();
                (scale, offset)
            }
            Strategy::MinMax { lo, hi } => {
                let min = stats.min.as_ref().ok_or_else(|| missing("min"))?;
                let max = stats.max.as_ref().ok_or_else(|| missing("max"))?;
                let scale: Vec<f64> = min
                    .iter()
                    .zip(max)
                    .map(|(&mn, &mx)| {
                        let range = mx - mn;
                        if range == 0.0 {
                            1.0
                        } else {
                            (hi - lo) / range
                        }
                    })
                    .collect();
                let offset = min.iter().zip(&scale).map(|(&mn, &a)| lo - mn * a).collect();
                (scale, offset)
            }
        };

        Ok(Self { scale, offset })
    }

    /// Number of fields (or constants) this normalizer covers
    pub fn len(&self) -> usize {
        self.scale.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scale.is_empty()
    }

    /// Normalize in place, broadcasting each field's transform across all
    /// other axes. `fields_axis` selects the axis the statistics index.
    pub fn apply(&self, arr: &mut ArrayD<f32>, fields_axis: usize) {
        debug_assert_eq!(arr.shape()[fields_axis], self.scale.len());
        for (i, mut lane) in arr.axis_iter_mut(Axis(fields_axis)).enumerate() {
            let (a, b) = (self.scale[i], self.offset[i]);
            lane.mapv_inplace(|v| (v as f64 * a + b) as f32);
        }
    }

    /// Exact algebraic inverse of [`Normalizer::apply`]
    pub fn apply_rev(&self, arr: &mut ArrayD<f32>, fields_axis: usize) {
        debug_assert_eq!(arr.shape()[fields_axis], self.scale.len());
        for (i, mut lane) in arr.axis_iter_mut(Axis(fields_axis)).enumerate() {
            let (a, b) = (self.scale[i], self.offset[i]);
            lane.mapv_inplace(|v| ((v as f64 - b) / a) as f32);
        }
    }

    /// Normalize a constants vector in place
    pub fn apply_scalars(&self, values: &mut [f64]) {
        debug_assert_eq!(values.len(), self.scale.len());
        for (i, v) in values.iter_mut().enumerate() {
            *v = *v * self.scale[i] + self.offset[i];
        }
    }

    /// Reverse of [`Normalizer::apply_scalars`]
    pub fn apply_scalars_rev(&self, values: &mut [f64]) {
        debug_assert_eq!(values.len(), self.scale.len());
        for (i, v) in values.iter_mut().enumerate() {
            *v = (*v - self.offset[i]) / self.scale[i];
        }
    }
}
