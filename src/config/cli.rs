//! Command-line argument parsing
//!
//! Arguments are grouped per subcommand; windowing and selection options
//! shared by `stats` and `sample` live in [`WindowArgs`].

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::norm::Strategy;

/// Sample loader for PDE simulation archives
#[derive(Parser, Debug, Clone)]
#[command(name = "pde-sample-loader")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Configuration file (JSON); absent keys fall back to defaults
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (debug level)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short = 'q', long = "quiet", global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Skip all network access
    #[arg(long = "offline", global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List all datasets known locally and in the remote repository
    List,

    /// Show metadata and layout of a dataset
    Info {
        /// Dataset name or path to an archive file
        dataset: String,
    },

    /// Download a dataset into the global datasets directory
    Fetch {
        /// Dataset name in the remote repository
        dataset: String,

        /// For partitioned datasets, download only these simulations
        #[arg(long = "sims", value_delimiter = ',')]
        sims: Option<Vec<usize>>,
    },

    /// Compute (and cache) normalization statistics for a dataset
    Stats {
        /// Dataset name or path to an archive file
        dataset: String,

        /// Normalization strategy to cache statistics for
        #[arg(long = "strategy", value_enum, default_value = "mean-std")]
        strategy: StrategyArg,

        /// Drop every cached payload before recomputing
        #[arg(long = "clear")]
        clear: bool,
    },

    /// Extract one sample and print its shapes and constants
    Sample {
        /// Dataset name or path to an archive file
        dataset: String,

        /// Flat sample index
        #[arg(long = "index", default_value_t = 0)]
        index: usize,

        /// Normalization strategy applied to data and constants
        #[arg(long = "normalize", value_enum)]
        normalize: Option<StrategyArg>,

        #[command(flatten)]
        window: WindowArgs,
    },
}

/// Windowing and selection options
#[derive(Args, Debug, Clone, Default)]
pub struct WindowArgs {
    /// Frame distance between input and target frame
    #[arg(long = "time-steps")]
    pub time_steps: Option<usize>,

    /// One whole-trajectory sample per simulation
    #[arg(long = "all-time-steps")]
    pub all_time_steps: bool,

    /// Include every frame between input and target in the target
    #[arg(long = "intermediate")]
    pub intermediate: bool,

    /// Frames excluded at the start of each simulation
    #[arg(long = "trim-start")]
    pub trim_start: Option<usize>,

    /// Frames excluded at the end of each simulation
    #[arg(long = "trim-end")]
    pub trim_end: Option<usize>,

    /// Stride between successive sample start frames
    #[arg(long = "step-size")]
    pub step_size: Option<usize>,

    /// Simulations to serve samples from
    #[arg(long = "sims", value_delimiter = ',')]
    pub sims: Option<Vec<usize>>,

    /// Field channels to keep in the input
    #[arg(long = "channels", value_delimiter = ',')]
    pub channels: Option<Vec<usize>>,

    /// Constants to include, by declared name
    #[arg(long = "constants", value_delimiter = ',')]
    pub constants: Option<Vec<String>>,
}

/// Normalization strategy as exposed on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    /// Scale by the reciprocal standard deviation
    Std,
    /// Subtract the mean, then scale by the reciprocal standard deviation
    MeanStd,
    /// Rescale the observed range to [-1, 1]
    MinMax,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Std => Strategy::Std,
            StrategyArg::MeanStd => Strategy::MeanStd,
            StrategyArg::MinMax => Strategy::min_max_default(),
        }
    }
}

impl From<&WindowArgs> for crate::sampling::WindowOptions {
    fn from(args: &WindowArgs) -> Self {
        Self {
            time_steps: args.time_steps,
            all_time_steps: args.all_time_steps,
            intermediate_time_steps: if args.intermediate { Some(true) } else { None },
            trim_start: args.trim_start,
            trim_end: args.trim_end,
            step_size: args.step_size,
        }
    }
}
