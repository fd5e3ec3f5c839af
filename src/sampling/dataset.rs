//! Dataset orchestration
//!
//! Ties the pieces together: catalog resolution and download, archive
//! validation, window resolution, normalization statistics, and sample
//! assembly. A `Dataset` holds a read-only archive handle for its whole
//! lifetime; the handle is swapped for a read-write one only inside
//! [`Dataset::with_write_access`], which reacquires the read handle on
//! every exit path.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::archive::{validate, ArchiveLayout, ArchiveMetadata, Container, ContainerRw};
use crate::catalog::{self, Catalog};
use crate::config::LoaderConfig;
use crate::norm::{self, ComputedStats, Normalizer, Strategy};
use crate::utils::{LoaderError, Result};

use super::assembler::{Sample, SampleAssembler};
use super::window::{IndexMapper, WindowOptions, WindowParams};

/// Caller-supplied dataset construction options
#[derive(Debug, Clone, Default)]
pub struct DatasetOptions {
    /// Sample windowing parameters
    pub window: WindowOptions,
    /// Normalization strategy applied to input and target data
    pub normalize_data: Option<Strategy>,
    /// Normalization strategy applied to constants
    pub normalize_const: Option<Strategy>,
    /// Simulations to serve samples from, in caller order. `None` selects
    /// all simulations.
    pub sel_sims: Option<Vec<usize>>,
    /// Constants to include in samples, by declared name. Returned in
    /// declaration order regardless of the order given here.
    pub sel_const: Option<Vec<String>>,
    /// Field channels to keep in the input, in caller order
    pub sel_channels: Option<Vec<usize>>,
    /// Suppress progress bars (statistics pass and downloads)
    pub disable_progress: bool,
    /// Drop every cached normalization payload before building
    pub clear_norm_data: bool,
}

/// A sample-indexed view over one simulation archive
pub struct Dataset {
    name: String,
    path: PathBuf,
    // None only while a write-access scope holds the file
    container: Option<Container>,
    meta: ArchiveMetadata,
    layout: ArchiveLayout,
    mapper: IndexMapper,
    assembler: SampleAssembler,
    disable_progress: bool,
    // One statistics pass serves every strategy requested during
    // construction of this dataset
    stats_memo: Option<ComputedStats>,
}

impl Dataset {
    /// Open a dataset by catalog name, downloading it first if necessary
    pub fn open(name: &str, options: DatasetOptions, config: &LoaderConfig) -> Result<Self> {
        let catalog = Catalog::load(config)?;
        let fetched = catalog::ensure_local(
            &catalog,
            config,
            name,
            options.sel_sims.as_deref(),
            options.disable_progress,
        )?;

        let mut options = options;
        if fetched.modified {
            // A rewritten archive carries no statistics cache anyway, but
            // make the invalidation explicit
            options.clear_norm_data = true;
        }
        Self::build(name, &fetched.path, options)
    }

    /// Open a dataset from an archive file directly, bypassing the catalog
    pub fn from_file<P: AsRef<Path>>(path: P, options: DatasetOptions) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset")
            .to_string();
        Self::build(&name, path, options)
    }

    fn build(name: &str, path: &Path, options: DatasetOptions) -> Result<Self> {
        let container = Container::open(path)?;
        let meta = ArchiveMetadata::from_container(&container)?;
        let layout = validate(&container, &meta)?;

        let sel_const = resolve_const_selection(options.sel_const.as_deref(), &meta.constants)?;
        if let Some(channels) = &options.sel_channels {
            if let Some(&bad) = channels.iter().find(|&&c| c >= layout.num_fields()) {
                return Err(LoaderError::Config(format!(
                    "selected channel {bad} out of range (archive has {} fields)",
                    layout.num_fields()
                )));
            }
        }

        let window = WindowParams::resolve(&options.window, layout.num_frames())?;
        let mapper = IndexMapper::new(window, &layout.sim_ids, options.sel_sims.clone())?;

        let mut dataset = Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            container: Some(container),
            meta,
            layout,
            mapper,
            assembler: SampleAssembler {
                intermediate_time_steps: window.intermediate_time_steps,
                sel_const: sel_const.clone(),
                sel_channels: options.sel_channels.clone(),
                norm_data: None,
                norm_const: None,
            },
            disable_progress: options.disable_progress,
            stats_memo: None,
        };

        if options.clear_norm_data {
            dataset.with_write_access(|rw| {
                let removed = norm::clear_cache(rw);
                if removed > 0 {
                    rw.flush()?;
                }
                Ok(())
            })?;
        }

        if let Some(strategy) = options.normalize_data {
            let stats = dataset.ensure_stats(strategy, sel_const.as_deref())?;
            dataset.assembler.norm_data = Some(Normalizer::from_stats(strategy, &stats.fields)?);
        }
        if let Some(strategy) = options.normalize_const {
            let stats = dataset.ensure_stats(strategy, sel_const.as_deref())?;
            dataset.assembler.norm_const =
                Some(Normalizer::from_stats(strategy, &stats.constants)?);
        }

        let selected_note = match &options.sel_sims {
            Some(sel) => format!("({} selected) ", sel.len()),
            None => String::new(),
        };
        info!(
            "Loaded {} with {} simulations {}and {} samples each.",
            dataset.name,
            dataset.layout.num_sims(),
            selected_note,
            window.samples_per_sim
        );
        Ok(dataset)
    }

    /// Dataset name (catalog name or file stem)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Archive metadata
    pub fn meta(&self) -> &ArchiveMetadata {
        &self.meta
    }

    /// Validated archive layout
    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    /// Resolved windowing parameters
    pub fn window(&self) -> &WindowParams {
        self.mapper.window()
    }

    /// Number of samples this dataset serves
    pub fn len(&self) -> usize {
        self.mapper.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapper.is_empty()
    }

    /// Extract the sample at `idx`
    pub fn get(&self, idx: usize) -> Result<Sample> {
        let loc = self.mapper.map(idx)?;
        self.assembler
            .assemble(self.container()?, &self.meta.constants, loc)
    }

    /// Iterate over all samples in index order
    pub fn iter_samples(&self) -> impl Iterator<Item = Result<Sample>> + '_ {
        (0..self.len()).map(move |idx| self.get(idx))
    }

    /// Contiguous index ranges, one per selected simulation. The iterator
    /// can be consumed repeatedly.
    pub fn sim_ranges(&self) -> impl Iterator<Item = std::ops::Range<usize>> + '_ {
        self.mapper.sim_ranges()
    }

    fn container(&self) -> Result<&Container> {
        // with_write_access restores the handle on every exit path unless
        // reopening the archive itself failed; after that the dataset only
        // reports the lost handle instead of serving samples
        self.container.as_ref().ok_or(LoaderError::HandleLost)
    }

    /// Run `f` with read-write access to the archive.
    ///
    /// The read-only mapping is dropped first and reacquired afterwards
    /// whether or not `f` succeeds. If reacquiring fails the dataset keeps
    /// no handle and every subsequent read reports
    /// [`LoaderError::HandleLost`]; the reacquire error itself is reported
    /// only when `f` succeeded.
    pub fn with_write_access<T>(
        &mut self,
        f: impl FnOnce(&mut ContainerRw) -> Result<T>,
    ) -> Result<T> {
        self.container = None;

        let result = ContainerRw::open(&self.path)
            .map_err(LoaderError::from)
            .and_then(|mut rw| f(&mut rw));

        match Container::open(&self.path) {
            Ok(container) => {
                self.container = Some(container);
                result
            }
            Err(e) => result.and(Err(e.into())),
        }
    }

    /// Return cached statistics for `strategy`, computing and persisting
    /// them if the cache is missing or incomplete.
    fn ensure_stats(
        &mut self,
        strategy: Strategy,
        sel_const: Option<&[usize]>,
    ) -> Result<norm::NormStats> {
        let num_sel_consts = sel_const.map_or(self.meta.constants.len(), <[usize]>::len);
        if norm::check_norm_data(
            self.container()?,
            strategy,
            sel_const,
            self.layout.num_fields(),
            num_sel_consts,
        ) {
            if let Some(cached) = norm::load(self.container()?, strategy, sel_const) {
                return Ok(cached);
            }
        }

        info!("No precomputed normalization data found (or not complete). Calculating data...");
        if self.stats_memo.is_none() {
            let computed = norm::calculate(
                self.container()?,
                &self.layout,
                &self.meta,
                self.disable_progress,
            )?;
            self.stats_memo = Some(computed);
        }
        let payload = match &self.stats_memo {
            Some(computed) => computed.for_strategy(strategy, sel_const),
            None => unreachable!("statistics memo populated above"),
        };

        let sel_owned: Option<Vec<usize>> = sel_const.map(<[usize]>::to_vec);
        self.with_write_access(|rw| {
            norm::persist(rw, strategy, sel_owned.as_deref(), &payload)?;
            Ok(())
        })?;
        Ok(payload)
    }
}

/// Map selected constant names to sorted declaration-order indices
fn resolve_const_selection(
    sel_const: Option<&[String]>,
    declared: &[String],
) -> Result<Option<Vec<usize>>> {
    let Some(names) = sel_const else {
        return Ok(None);
    };
    let mut indices = Vec::with_capacity(names.len());
    for name in names {
        let idx = declared.iter().position(|c| c == name).ok_or_else(|| {
            LoaderError::Config(format!(
                "unknown constant '{}', declared constants are: {}",
                name,
                declared.join(", ")
            ))
        })?;
        indices.push(idx);
    }
    indices.sort_unstable();
    indices.dedup();
    Ok(Some(indices))
}
