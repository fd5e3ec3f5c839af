//! pde-sample-loader - command-line front end
//!
//! Thin wrapper around the library: dataset listing, metadata
//! inspection, downloads, statistics caching, and single-sample
//! extraction for debugging.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use pde_sample_loader::archive::{validate, ArchiveMetadata, Container};
use pde_sample_loader::catalog::{self, Catalog, DatasetSource};
use pde_sample_loader::config::{CliArgs, Command, LoaderConfig};
use pde_sample_loader::sampling::{Dataset, DatasetOptions, WindowOptions};

fn setup_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::WARN
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn load_config(args: &CliArgs) -> Result<LoaderConfig> {
    let mut config = match &args.config {
        Some(path) => LoaderConfig::from_file(path)?,
        None => LoaderConfig::default(),
    };
    if args.offline {
        config.offline = true;
    }
    Ok(config)
}

/// Resolve a CLI dataset argument: an existing file path wins, otherwise
/// the name goes through the catalog.
fn open_dataset(dataset: &str, options: DatasetOptions, config: &LoaderConfig) -> Result<Dataset> {
    if Path::new(dataset).is_file() {
        Ok(Dataset::from_file(dataset, options)?)
    } else {
        Ok(Dataset::open(dataset, options, config)?)
    }
}

/// Local archive path for a dataset argument, if one exists on disk
fn local_archive_path(dataset: &str, config: &LoaderConfig) -> Option<PathBuf> {
    let direct = PathBuf::from(dataset);
    if direct.is_file() {
        return Some(direct);
    }
    for candidate in [config.local_path(dataset), config.global_path(dataset)] {
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn cmd_list(config: &LoaderConfig) -> Result<()> {
    let catalog = Catalog::load(config)?;
    let names = catalog.datasets();
    if names.is_empty() {
        println!("No datasets found.");
        return Ok(());
    }
    for name in names {
        let origin = match catalog.resolve(&name)? {
            DatasetSource::Local(_) => "local",
            DatasetSource::Remote(_) => "remote",
        };
        println!("{name:<40} [{origin}]");
    }
    Ok(())
}

fn cmd_info(dataset: &str, config: &LoaderConfig) -> Result<()> {
    if let Some(path) = local_archive_path(dataset, config) {
        let container = Container::open(&path)?;
        let meta = ArchiveMetadata::from_container(&container)?;
        let layout = validate(&container, &meta)?;

        println!("{}", meta.render_info());
        println!("Simulations:   {}", layout.num_sims());
        println!("Frames/sim:    {}", layout.num_frames());
        println!("Fields:        {}", layout.num_fields());
        println!("Spatial dims:  {:?}", layout.spatial_dims());
        return Ok(());
    }

    // Not on disk: fall back to what the remote index publishes
    let catalog = Catalog::load(config)?;
    match catalog.resolve(dataset)? {
        DatasetSource::Remote(entry) => {
            println!("{dataset} (not downloaded)");
            if let Some(num_sims) = entry.num_sims {
                println!("Simulations:   {num_sims}");
            }
            for (key, value) in &entry.meta {
                println!("{key}: {value}");
            }
            Ok(())
        }
        DatasetSource::Local(path) => {
            // Catalog found it even though our candidates missed; recurse
            // through the concrete path
            cmd_info(&path.to_string_lossy(), config)
        }
    }
}

fn cmd_fetch(dataset: &str, sims: Option<&[usize]>, config: &LoaderConfig) -> Result<()> {
    let catalog = Catalog::load(config)?;
    let outcome = catalog::ensure_local(&catalog, config, dataset, sims, false)?;
    if outcome.modified {
        info!("Downloaded '{}' to {}", dataset, outcome.path.display());
    } else {
        info!("'{}' is already available at {}", dataset, outcome.path.display());
    }
    Ok(())
}

fn run() -> Result<()> {
    let args = CliArgs::parse();
    setup_logging(args.verbose, args.quiet);
    let config = load_config(&args)?;

    match &args.command {
        Command::List => cmd_list(&config),
        Command::Info { dataset } => cmd_info(dataset, &config),
        Command::Fetch { dataset, sims } => cmd_fetch(dataset, sims.as_deref(), &config),
        Command::Stats {
            dataset,
            strategy,
            clear,
        } => {
            let options = DatasetOptions {
                normalize_data: Some((*strategy).into()),
                normalize_const: Some((*strategy).into()),
                clear_norm_data: *clear,
                ..Default::default()
            };
            // Construction computes and caches the statistics
            let ds = open_dataset(dataset, options, &config)?;
            info!(
                "Statistics cached for '{}' ({} fields, {} constants)",
                ds.name(),
                ds.layout().num_fields(),
                ds.meta().constants.len()
            );
            Ok(())
        }
        Command::Sample {
            dataset,
            index,
            normalize,
            window,
        } => {
            let options = DatasetOptions {
                window: WindowOptions::from(window),
                normalize_data: (*normalize).map(Into::into),
                normalize_const: (*normalize).map(Into::into),
                sel_sims: window.sims.clone(),
                sel_channels: window.channels.clone(),
                sel_const: window.constants.clone(),
                ..Default::default()
            };
            let ds = open_dataset(dataset, options, &config)?;
            let sample = ds.get(*index)?;

            println!("Sample {}/{}", index, ds.len());
            println!("Input shape:   {:?}", sample.input.shape());
            println!("Target shape:  {:?}", sample.target.shape());
            println!("Constants:     {:?}", sample.constants);
            println!("Raw constants: {:?}", sample.raw_constants);
            Ok(())
        }
    }
}

fn main() {
    if let Err(e) = run() {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
