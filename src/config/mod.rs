//! Configuration module

pub mod cli;
pub mod loader_config;

pub use cli::{CliArgs, Command, StrategyArg, WindowArgs};
pub use loader_config::LoaderConfig;
