//! Sample indexing, windowing, and extraction

pub mod assembler;
pub mod dataset;
pub mod window;

pub use assembler::{Sample, SampleAssembler};
pub use dataset::{Dataset, DatasetOptions};
pub use window::{IndexMapper, SampleLocation, WindowOptions, WindowParams};
