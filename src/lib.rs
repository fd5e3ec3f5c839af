//! pde-sample-loader library
//!
//! Sample-indexed access to archives of PDE simulation trajectories:
//! windowing and index mapping, simulation/channel/constant selection,
//! reversible normalization with cached statistics, and catalog-backed
//! downloads from a remote dataset repository.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod norm;
pub mod sampling;
pub mod utils;
