//! Shared test fixture: a small randomized archive mirroring the layout
//! of published datasets.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use pde_sample_loader::archive::{sim_name, ContainerWriter, ROOT_NS};

pub const NUM_SIMS: usize = 3;
pub const NUM_FRAMES: usize = 1000;
pub const NUM_FIELDS: usize = 4;
pub const SPATIAL: [usize; 2] = [16, 8];

/// Write a 3-simulation random archive and return its path together with
/// the per-simulation constant values.
pub fn write_random_archive(dir: &Path) -> (PathBuf, Vec<f64>) {
    let path = dir.join("random.pba");
    let mut writer = ContainerWriter::new();
    let mut rng = StdRng::seed_from_u64(1);

    let mut consts = Vec::with_capacity(NUM_SIMS);
    for s in 0..NUM_SIMS {
        let shape = vec![NUM_FRAMES, NUM_FIELDS, SPATIAL[0], SPATIAL[1]];
        let data = ArrayD::from_shape_fn(shape, |_| rng.gen::<f32>());
        writer.add_array(&sim_name(s), data).unwrap();

        let value: f64 = rng.gen_range(0.1..2.0);
        writer.set_attr(&sim_name(s), "Const1", json!(value));
        consts.push(value);
    }

    writer.set_attr(ROOT_NS, "PDE", json!("The Everything Formula"));
    writer.set_attr(ROOT_NS, "Fields Scheme", json!("aBBc"));
    writer.set_attr(
        ROOT_NS,
        "Fields",
        json!(["Field1", "Field2a", "Field2b", "Field3"]),
    );
    writer.set_attr(ROOT_NS, "Constants", json!(["Const1"]));
    writer.set_attr(ROOT_NS, "Dt", json!(0.01));
    writer.write(&path).unwrap();

    (path, consts)
}

/// Number of frames used by the partial-archive fixture
pub const PART_FRAMES: usize = 50;

/// Write an archive holding exactly the given simulation ids, the way a
/// selective partitioned download leaves them on disk. Returns the path
/// and the constant value of each written simulation, in `sim_ids` order.
pub fn write_partial_archive(dir: &Path, sim_ids: &[usize]) -> (PathBuf, Vec<f64>) {
    let path = dir.join("partial.pba");
    let mut writer = ContainerWriter::new();
    let mut rng = StdRng::seed_from_u64(7);

    let mut consts = Vec::with_capacity(sim_ids.len());
    for &s in sim_ids {
        let shape = vec![PART_FRAMES, NUM_FIELDS, SPATIAL[0], SPATIAL[1]];
        let data = ArrayD::from_shape_fn(shape, |_| rng.gen::<f32>());
        writer.add_array(&sim_name(s), data).unwrap();

        let value: f64 = rng.gen_range(0.1..2.0);
        writer.set_attr(&sim_name(s), "Const1", json!(value));
        consts.push(value);
    }

    writer.set_attr(ROOT_NS, "PDE", json!("The Everything Formula"));
    writer.set_attr(ROOT_NS, "Fields Scheme", json!("aBBc"));
    writer.set_attr(
        ROOT_NS,
        "Fields",
        json!(["Field1", "Field2a", "Field2b", "Field3"]),
    );
    writer.set_attr(ROOT_NS, "Constants", json!(["Const1"]));
    writer.set_attr(ROOT_NS, "Dt", json!(0.01));
    writer.write(&path).unwrap();

    (path, consts)
}
