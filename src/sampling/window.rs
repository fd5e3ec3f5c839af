//! Sample windowing and index mapping
//!
//! Pure arithmetic: a flat sample index resolves to a simulation and a
//! frame window inside it. No storage access happens here, so the mapping
//! is deterministic and index-stable for a given selection.

use std::ops::Range;

use tracing::warn;

use crate::utils::{LoaderError, Result};

/// Caller-supplied windowing options, all optional
#[derive(Debug, Clone, Default)]
pub struct WindowOptions {
    /// Frame distance between input and (final) target frame.
    /// Defaults to `num_frames - 1`.
    pub time_steps: Option<usize>,
    /// Convenience mode: one sample per simulation spanning the whole
    /// trajectory. Pins every other windowing parameter.
    pub all_time_steps: bool,
    /// Whether the target includes every intervening frame
    pub intermediate_time_steps: Option<bool>,
    /// Frames excluded from sampling at the start of each simulation
    pub trim_start: Option<usize>,
    /// Frames excluded from sampling at the end of each simulation
    pub trim_end: Option<usize>,
    /// Stride between successive sample start frames
    pub step_size: Option<usize>,
}

/// Resolved windowing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowParams {
    pub time_steps: usize,
    pub intermediate_time_steps: bool,
    pub trim_start: usize,
    pub trim_end: usize,
    pub step_size: usize,
    pub samples_per_sim: usize,
}

impl WindowParams {
    /// Resolve options against the archive's frame count.
    ///
    /// Whole-trajectory mode pins `time_steps = num_frames - 1`,
    /// intermediate frames on, no trimming, stride 1. Explicit windowing
    /// parameters supplied alongside it conflict; they are ignored with a
    /// warning rather than failing the construction.
    pub fn resolve(opts: &WindowOptions, num_frames: usize) -> Result<Self> {
        if num_frames == 0 {
            return Err(LoaderError::Config(
                "simulations contain no frames".into(),
            ));
        }

        if opts.all_time_steps {
            for (name, set) in [
                ("time_steps", opts.time_steps.is_some()),
                (
                    "intermediate_time_steps",
                    opts.intermediate_time_steps.is_some(),
                ),
                ("trim_start", opts.trim_start.is_some()),
                ("trim_end", opts.trim_end.is_some()),
                ("step_size", opts.step_size.is_some()),
            ] {
                if set {
                    warn!(
                        "`{}` is managed by `all_time_steps` and can therefore not be set manually",
                        name
                    );
                }
            }

            return Ok(Self {
                time_steps: num_frames - 1,
                intermediate_time_steps: true,
                trim_start: 0,
                trim_end: 0,
                step_size: 1,
                samples_per_sim: 1,
            });
        }

        let time_steps = opts.time_steps.unwrap_or(num_frames.saturating_sub(1));
        let intermediate_time_steps = opts.intermediate_time_steps.unwrap_or(false);
        let trim_start = opts.trim_start.unwrap_or(0);
        let trim_end = opts.trim_end.unwrap_or(0);
        let step_size = opts.step_size.unwrap_or(1);

        if step_size == 0 {
            return Err(LoaderError::Config("`step_size` must be at least 1".into()));
        }
        if time_steps == 0 {
            return Err(LoaderError::Config("`time_steps` must be at least 1".into()));
        }
        if time_steps + trim_start + trim_end >= num_frames {
            return Err(LoaderError::Config(format!(
                "window does not fit: time_steps ({time_steps}) + trim_start ({trim_start}) \
                 + trim_end ({trim_end}) must be smaller than num_frames ({num_frames})"
            )));
        }

        let samples_per_sim = (num_frames - time_steps - trim_start - trim_end) / step_size;

        Ok(Self {
            time_steps,
            intermediate_time_steps,
            trim_start,
            trim_end,
            step_size,
            samples_per_sim,
        })
    }
}

/// Physical location of one sample inside the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLocation {
    /// Index of the simulation array (already resolved through the
    /// simulation selection)
    pub sim_index: usize,
    /// Frame used as the input
    pub input_frame: usize,
    /// Final target frame; with intermediate frames the target covers
    /// `(input_frame + 1)..=target_frame`
    pub target_frame: usize,
}

/// Flat-index to location mapper
#[derive(Debug, Clone)]
pub struct IndexMapper {
    window: WindowParams,
    sel: Vec<usize>,
}

impl IndexMapper {
    /// Build a mapper over the simulations whose absolute ids are
    /// `present` (in archive order), optionally restricted to an explicit
    /// subset.
    ///
    /// Selection entries are absolute ids, not positions: a partially
    /// downloaded archive holding only simulations 2 and 5 is opened with
    /// `sel_sims = [2, 5]`. Entries keep their given order.
    pub fn new(
        window: WindowParams,
        present: &[usize],
        sel_sims: Option<Vec<usize>>,
    ) -> Result<Self> {
        let sel = match sel_sims {
            Some(sel) => {
                if let Some(&bad) = sel.iter().find(|&&s| !present.contains(&s)) {
                    return Err(LoaderError::Config(format!(
                        "selected simulation {bad} is not present in the archive"
                    )));
                }
                sel
            }
            None => present.to_vec(),
        };
        Ok(Self { window, sel })
    }

    pub fn window(&self) -> &WindowParams {
        &self.window
    }

    /// Number of selected simulations
    pub fn num_selected_sims(&self) -> usize {
        self.sel.len()
    }

    /// Total number of samples
    pub fn len(&self) -> usize {
        self.num_selected_sims() * self.window.samples_per_sim
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Map a flat sample index to its physical location.
    ///
    /// Deterministic and side-effect free: the same index always resolves
    /// to the same location for a given selection.
    pub fn map(&self, idx: usize) -> Result<SampleLocation> {
        if idx >= self.len() {
            return Err(LoaderError::OutOfRange {
                index: idx,
                length: self.len(),
            });
        }

        let slot = idx / self.window.samples_per_sim;
        let sim_index = self.sel[slot];

        let local = idx % self.window.samples_per_sim;
        let input_frame = self.window.trim_start + local * self.window.step_size;
        let target_frame = input_frame + self.window.time_steps;

        Ok(SampleLocation {
            sim_index,
            input_frame,
            target_frame,
        })
    }

    /// Restartable lazy sequence of flat-index ranges, one per selected
    /// simulation. Carries no hidden state: re-derivable at any time from
    /// the selection and the current samples_per_sim.
    pub fn sim_ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        let per_sim = self.window.samples_per_sim;
        (0..self.num_selected_sims()).map(move |s| s * per_sim..(s + 1) * per_sim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(opts: WindowOptions, num_frames: usize) -> WindowParams {
        WindowParams::resolve(&opts, num_frames).unwrap()
    }

    #[test]
    fn test_defaults_span_whole_trajectory() {
        // 1000 frames, no explicit parameters: a single sample per sim
        // from frame 0 to frame 999
        let params = window(WindowOptions::default(), 1000);
        assert_eq!(params.time_steps, 999);
        assert_eq!(params.samples_per_sim, 1);
        assert!(!params.intermediate_time_steps);

        let mapper = IndexMapper::new(params, &[0, 1, 2], None).unwrap();
        assert_eq!(mapper.len(), 3);
        let loc = mapper.map(0).unwrap();
        assert_eq!(loc.sim_index, 0);
        assert_eq!(loc.input_frame, 0);
        assert_eq!(loc.target_frame, 999);
    }

    #[test]
    fn test_intermediate_window_counts() {
        let params = window(
            WindowOptions {
                time_steps: Some(5),
                intermediate_time_steps: Some(true),
                ..Default::default()
            },
            1000,
        );
        assert_eq!(params.samples_per_sim, 995);

        let mapper = IndexMapper::new(params, &[0, 1, 2, 3], None).unwrap();
        assert_eq!(mapper.len(), 4 * 995);

        let loc = mapper.map(0).unwrap();
        assert_eq!(loc.input_frame, 0);
        assert_eq!(loc.target_frame, 5);

        // last sample of the second simulation
        let loc = mapper.map(2 * 995 - 1).unwrap();
        assert_eq!(loc.sim_index, 1);
        assert_eq!(loc.input_frame, 994);
        assert_eq!(loc.target_frame, 999);
    }

    #[test]
    fn test_trim_and_stride() {
        let params = window(
            WindowOptions {
                time_steps: Some(10),
                trim_start: Some(5),
                trim_end: Some(5),
                step_size: Some(4),
                ..Default::default()
            },
            100,
        );
        // (100 - 10 - 5 - 5) / 4
        assert_eq!(params.samples_per_sim, 20);

        let mapper = IndexMapper::new(params, &[0], None).unwrap();
        let loc = mapper.map(3).unwrap();
        assert_eq!(loc.input_frame, 5 + 3 * 4);
        assert_eq!(loc.target_frame, loc.input_frame + 10);
    }

    #[test]
    fn test_selected_sims_resolve_in_order() {
        let params = window(
            WindowOptions {
                time_steps: Some(1),
                ..Default::default()
            },
            11,
        );
        assert_eq!(params.samples_per_sim, 10);

        let mapper = IndexMapper::new(params, &[0, 1, 2, 3, 4, 5], Some(vec![4, 1])).unwrap();
        assert_eq!(mapper.len(), 20);
        assert_eq!(mapper.map(0).unwrap().sim_index, 4);
        assert_eq!(mapper.map(10).unwrap().sim_index, 1);
        assert_eq!(mapper.map(10).unwrap().input_frame, 0);
    }

    #[test]
    fn test_map_is_deterministic() {
        let params = window(
            WindowOptions {
                time_steps: Some(3),
                step_size: Some(2),
                ..Default::default()
            },
            50,
        );
        let mapper = IndexMapper::new(params, &[0, 1, 2, 3, 4], Some(vec![0, 2, 4])).unwrap();
        for idx in 0..mapper.len() {
            assert_eq!(mapper.map(idx).unwrap(), mapper.map(idx).unwrap());
        }
    }

    #[test]
    fn test_out_of_range() {
        let params = window(WindowOptions::default(), 10);
        let mapper = IndexMapper::new(params, &[0, 1], None).unwrap();
        assert_eq!(mapper.len(), 2);
        assert!(matches!(
            mapper.map(2),
            Err(LoaderError::OutOfRange {
                index: 2,
                length: 2
            })
        ));
    }

    #[test]
    fn test_all_time_steps_ignores_explicit_values() {
        let params = window(
            WindowOptions {
                all_time_steps: true,
                time_steps: Some(5),
                step_size: Some(3),
                ..Default::default()
            },
            1000,
        );
        assert_eq!(params.time_steps, 999);
        assert_eq!(params.step_size, 1);
        assert!(params.intermediate_time_steps);
        assert_eq!(params.samples_per_sim, 1);
    }

    #[test]
    fn test_window_that_does_not_fit_is_rejected() {
        let opts = WindowOptions {
            time_steps: Some(10),
            ..Default::default()
        };
        assert!(WindowParams::resolve(&opts, 10).is_err());
        assert!(WindowParams::resolve(&opts, 11).is_ok());
    }

    #[test]
    fn test_invalid_sim_selection_rejected() {
        let params = window(WindowOptions::default(), 10);
        assert!(IndexMapper::new(params, &[0, 1, 2], Some(vec![0, 3])).is_err());
    }

    #[test]
    fn test_selection_uses_absolute_ids_of_partial_archive() {
        // Partitioned downloads keep the published ids, so an archive can
        // hold exactly simulations 2 and 5 and nothing below them
        let params = window(WindowOptions::default(), 10);
        let mapper = IndexMapper::new(params, &[2, 5], Some(vec![2, 5])).unwrap();
        assert_eq!(mapper.len(), 2);
        assert_eq!(mapper.map(0).unwrap().sim_index, 2);
        assert_eq!(mapper.map(1).unwrap().sim_index, 5);

        // No selection serves everything present, in archive order
        let mapper = IndexMapper::new(params, &[2, 5], None).unwrap();
        assert_eq!(mapper.map(0).unwrap().sim_index, 2);
        assert_eq!(mapper.map(1).unwrap().sim_index, 5);

        // Ids below the count but absent from the archive are still invalid
        assert!(IndexMapper::new(params, &[2, 5], Some(vec![0])).is_err());
    }

    #[test]
    fn test_zero_frames_rejected() {
        assert!(WindowParams::resolve(&WindowOptions::default(), 0).is_err());
        let opts = WindowOptions {
            all_time_steps: true,
            ..Default::default()
        };
        assert!(WindowParams::resolve(&opts, 0).is_err());
    }

    #[test]
    fn test_sim_ranges_restartable() {
        let params = window(
            WindowOptions {
                time_steps: Some(1),
                ..Default::default()
            },
            6,
        );
        let mapper = IndexMapper::new(params, &[0, 1, 2], None).unwrap();

        let first: Vec<_> = mapper.sim_ranges().collect();
        let second: Vec<_> = mapper.sim_ranges().collect();
        assert_eq!(first, vec![0..5, 5..10, 10..15]);
        assert_eq!(first, second);
    }
}
