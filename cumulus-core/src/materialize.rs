//! Run materializer: experiment and run directories plus per-run config files.

use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{LaunchError, Result};
use crate::merge::{DATA_PATH_KEY, ResolvedConfig, ResolvedRun};
use crate::paths::increasable_name;

/// Key under which the durable dataset location is kept after the rewrite.
pub const ORIGINAL_PATH_KEY: &str = "original_path";

/// Parent of every run directory of one exploration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentDirectory {
    path: PathBuf,
}

impl ExperimentDirectory {
    /// Create `<root>/<name>`, or the next free `<name>_<n>` sibling.
    ///
    /// An existing experiment is never reused.
    pub fn create(root: &Path, name: &str) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| LaunchError::directory(root, e))?;
        let path = increasable_name(&root.join(name));
        std::fs::create_dir(&path).map_err(|e| LaunchError::directory(&path, e))?;
        debug!(path = %path.display(), "Created experiment directory");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of run `index`, whether or not it exists yet.
    pub fn run_path(&self, index: usize) -> PathBuf {
        self.path.join(format!("run_{index}"))
    }
}

/// Directory owning one run's config file and batch script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    pub index: usize,
    pub path: PathBuf,
}

impl RunDirectory {
    /// Create `run_<index>`. Fails if it already exists.
    pub fn create(experiment: &ExperimentDirectory, index: usize) -> Result<Self> {
        let path = experiment.run_path(index);
        std::fs::create_dir(&path).map_err(|e| LaunchError::directory(&path, e))?;
        Ok(Self { index, path })
    }
}

/// A run whose directory and config file exist on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedRun {
    pub run_dir: RunDirectory,
    pub config_path: PathBuf,
    /// The config as written, with `data.path` pointing at node-local scratch.
    pub config: ResolvedConfig,
}

impl MaterializedRun {
    /// Durable dataset location recorded by the rewrite.
    pub fn original_data_path(&self) -> Option<&str> {
        self.config
            .data
            .get(ORIGINAL_PATH_KEY)
            .and_then(Value::as_str)
    }
}

/// Point `data.path` at node-local scratch and keep the original under
/// `data.original_path`.
pub fn remap_data_path(config: &ResolvedConfig, node_local: &str) -> ResolvedConfig {
    let mut remapped = config.clone();
    if let Some(original) = remapped.data.get(DATA_PATH_KEY).cloned() {
        remapped
            .data
            .insert(Value::from(ORIGINAL_PATH_KEY), original);
    }
    remapped
        .data
        .insert(Value::from(DATA_PATH_KEY), Value::from(node_local));
    remapped
}

/// Serialize `config` to `<dir>/<file_name>`, replacing any existing file.
///
/// Only experiment directories get non-colliding names; config files inside a
/// run directory are overwritten.
pub fn write_config(dir: &Path, file_name: &str, config: &ResolvedConfig) -> Result<PathBuf> {
    let path = dir.join(file_name);
    std::fs::write(&path, config.to_yaml()?).map_err(|e| LaunchError::write(&path, e))?;
    Ok(path)
}

/// Create the run directory and write its config file.
pub fn materialize(
    experiment: &ExperimentDirectory,
    run: &ResolvedRun,
    node_local: &str,
) -> Result<MaterializedRun> {
    let run_dir = RunDirectory::create(experiment, run.index)?;
    let config = remap_data_path(&run.config, node_local);

    let config_path = write_config(&run_dir.path, &run.sbatch.conf_file_name(), &config)?;
    debug!(run = run.index, config = %config_path.display(), "Wrote run config");

    Ok(MaterializedRun {
        run_dir,
        config_path,
        config,
    })
}
