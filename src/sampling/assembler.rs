//! Sample assembly
//!
//! Materializes raw input/target frames and constants for a mapped
//! location, then applies normalization and channel selection. The order
//! matters: normalization uses statistics over the full field set, so
//! channel selection is a view restriction applied last.

use ndarray::{ArrayD, Axis};

use crate::archive::{sim_name, Container};
use crate::norm::Normalizer;
use crate::utils::{ArchiveError, Result};
use super::window::SampleLocation;

/// One training sample
#[derive(Debug, Clone)]
pub struct Sample {
    /// Input frame: `(fields (or selected channels), *spatial)`
    pub input: ArrayD<f32>,
    /// Target: `(fields, *spatial)`, or `(steps, fields, *spatial)` with
    /// intermediate frames
    pub target: ArrayD<f32>,
    /// Selected constants in declaration order, normalized when constant
    /// normalization is active
    pub constants: Vec<f64>,
    /// The same constants without normalization, for physical
    /// post-processing
    pub raw_constants: Vec<f64>,
}

/// Assembly-time selection and normalization parameters
///
/// `sel_const` and `sel_channels` hold declaration-order indices; the
/// dataset constructor validates and sorts them.
#[derive(Debug, Clone, Default)]
pub struct SampleAssembler {
    pub intermediate_time_steps: bool,
    pub sel_const: Option<Vec<usize>>,
    pub sel_channels: Option<Vec<usize>>,
    pub norm_data: Option<Normalizer>,
    pub norm_const: Option<Normalizer>,
}

impl SampleAssembler {
    /// Extract the sample at `loc`. Read-only: the only side effect is
    /// storage access.
    pub fn assemble(
        &self,
        container: &Container,
        constants: &[String],
        loc: SampleLocation,
    ) -> Result<Sample> {
        let sim = sim_name(loc.sim_index);

        let mut input = container.read_frame(&sim, loc.input_frame)?;
        let mut target = if self.intermediate_time_steps {
            // Contiguous frames (input_frame, target_frame], preserving
            // temporal order
            container.read_frames(&sim, loc.input_frame + 1, loc.target_frame + 1)?
        } else {
            container.read_frame(&sim, loc.target_frame)?
        };

        let raw_constants = self.read_constants(container, &sim, constants)?;
        let mut constants = raw_constants.clone();
        if let Some(norm) = &self.norm_const {
            norm.apply_scalars(&mut constants);
        }

        if let Some(norm) = &self.norm_data {
            norm.apply(&mut input, 0);
            let fields_axis = if self.intermediate_time_steps { 1 } else { 0 };
            norm.apply(&mut target, fields_axis);
        }

        if let Some(channels) = &self.sel_channels {
            input = input.select(Axis(0), channels);
            let fields_axis = if self.intermediate_time_steps { 1 } else { 0 };
            target = target.select(Axis(fields_axis), channels);
        }

        Ok(Sample {
            input,
            target,
            constants,
            raw_constants,
        })
    }

    fn read_constants(
        &self,
        container: &Container,
        sim: &str,
        declared: &[String],
    ) -> Result<Vec<f64>> {
        let indices: Vec<usize> = match &self.sel_const {
            Some(sel) => sel.clone(),
            None => (0..declared.len()).collect(),
        };

        indices
            .iter()
            .map(|&i| {
                let name = &declared[i];
                container
                    .get_attr(sim, name)
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| {
                        ArchiveError::AttrDecode(format!(
                            "constant '{name}' of '{sim}' is not a number"
                        ))
                        .into()
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ContainerWriter, ROOT_NS};
    use crate::norm::{Normalizer, StatArrays, Strategy};
    use ndarray::Array4;
    use serde_json::json;

    // 2 sims, 6 frames, 3 fields, 4x2 spatial; cell value encodes
    // (sim, frame, field) so tests can assert exact content
    fn write_test_archive(dir: &std::path::Path) -> Container {
        let mut writer = ContainerWriter::new();
        for s in 0..2usize {
            let data = Array4::from_shape_fn((6, 3, 4, 2), |(f, c, _, _)| {
                (s * 1000 + f * 10 + c) as f32
            });
            writer
                .add_array(&sim_name(s), data.into_dyn())
                .unwrap();
            writer.set_attr(&sim_name(s), "Mach", json!(0.5 + s as f64));
            writer.set_attr(&sim_name(s), "Reynolds", json!(100.0 * (s + 1) as f64));
        }
        writer.set_attr(ROOT_NS, "Constants", json!(["Mach", "Reynolds"]));
        let path = dir.join("assembler.pba");
        writer.write(&path).unwrap();
        Container::open(&path).unwrap()
    }

    fn declared() -> Vec<String> {
        vec!["Mach".into(), "Reynolds".into()]
    }

    #[test]
    fn test_single_target_shapes_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let container = write_test_archive(dir.path());

        let assembler = SampleAssembler::default();
        let sample = assembler
            .assemble(
                &container,
                &declared(),
                SampleLocation {
                    sim_index: 1,
                    input_frame: 0,
                    target_frame: 5,
                },
            )
            .unwrap();

        assert_eq!(sample.input.shape(), &[3, 4, 2]);
        assert_eq!(sample.target.shape(), &[3, 4, 2]);
        assert_eq!(sample.input[[2, 0, 0]], 1002.0);
        assert_eq!(sample.target[[2, 0, 0]], 1052.0);
        assert_eq!(sample.raw_constants, vec![1.5, 200.0]);
        assert_eq!(sample.constants, sample.raw_constants);
    }

    #[test]
    fn test_intermediate_target_preserves_temporal_order() {
        let dir = tempfile::tempdir().unwrap();
        let container = write_test_archive(dir.path());

        let assembler = SampleAssembler {
            intermediate_time_steps: true,
            ..Default::default()
        };
        let sample = assembler
            .assemble(
                &container,
                &declared(),
                SampleLocation {
                    sim_index: 0,
                    input_frame: 1,
                    target_frame: 4,
                },
            )
            .unwrap();

        // target covers frames 2..=4, leading axis length == time_steps
        assert_eq!(sample.target.shape(), &[3, 3, 4, 2]);
        assert_eq!(sample.target[[0, 0, 0, 0]], 20.0);
        assert_eq!(sample.target[[1, 0, 0, 0]], 30.0);
        assert_eq!(sample.target[[2, 0, 0, 0]], 40.0);
    }

    #[test]
    fn test_constant_selection_in_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        let container = write_test_archive(dir.path());

        let assembler = SampleAssembler {
            sel_const: Some(vec![1]),
            ..Default::default()
        };
        let sample = assembler
            .assemble(
                &container,
                &declared(),
                SampleLocation {
                    sim_index: 0,
                    input_frame: 0,
                    target_frame: 5,
                },
            )
            .unwrap();
        assert_eq!(sample.raw_constants, vec![100.0]);
    }

    #[test]
    fn test_channel_selection_applied_after_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let container = write_test_archive(dir.path());

        // Statistics over the full field set; channel selection must not
        // change which per-field transform each surviving channel gets
        let stats = StatArrays {
            std: Some(vec![2.0, 4.0, 8.0]),
            ..Default::default()
        };
        let norm = Normalizer::from_stats(Strategy::Std, &stats).unwrap();

        let base = SampleAssembler {
            norm_data: Some(norm.clone()),
            ..Default::default()
        };
        let selected = SampleAssembler {
            norm_data: Some(norm),
            sel_channels: Some(vec![2]),
            ..Default::default()
        };

        let loc = SampleLocation {
            sim_index: 0,
            input_frame: 0,
            target_frame: 5,
        };
        let full = base.assemble(&container, &declared(), loc).unwrap();
        let subset = selected.assemble(&container, &declared(), loc).unwrap();

        assert_eq!(subset.input.shape(), &[1, 4, 2]);
        assert_eq!(subset.input[[0, 0, 0]], full.input[[2, 0, 0]]);
        // field 2 of frame 0 is 2.0, normalized by std 8.0
        assert_eq!(subset.input[[0, 0, 0]], 0.25);
    }

    #[test]
    fn test_constant_normalization_keeps_raw_values() {
        let dir = tempfile::tempdir().unwrap();
        let container = write_test_archive(dir.path());

        let stats = StatArrays {
            std: Some(vec![0.5, 100.0]),
            ..Default::default()
        };
        let assembler = SampleAssembler {
            norm_const: Some(Normalizer::from_stats(Strategy::Std, &stats).unwrap()),
            ..Default::default()
        };
        let sample = assembler
            .assemble(
                &container,
                &declared(),
                SampleLocation {
                    sim_index: 0,
                    input_frame: 0,
                    target_frame: 5,
                },
            )
            .unwrap();

        assert_eq!(sample.raw_constants, vec![0.5, 100.0]);
        assert_eq!(sample.constants, vec![1.0, 1.0]);
    }
}
