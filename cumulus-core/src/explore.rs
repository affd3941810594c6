//! Exploration files: one experiment described as a list of run overrides.
//!
//! ```yaml
//! experiment:
//!   name: lr-sweep
//!   exp_dir: $SCRATCH/clouds/experiments
//!   repeat: 2
//! runs:
//!   - sbatch:
//!       runtime: "24:00:00"
//!     config:
//!       train:
//!         lr: 0.001
//!       data:
//!         path: /network/tmp1/clouds/data
//! ```

use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use std::path::{Path, PathBuf};

use crate::config::LauncherSettings;
use crate::error::{LaunchError, Result};
use crate::options::SchedulerOverride;
use crate::paths::expand_env_with;

/// Top-level exploration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationSpec {
    #[serde(default)]
    pub experiment: ExperimentMeta,
    #[serde(default)]
    pub runs: Vec<RunOverride>,
}

/// The `experiment` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMeta {
    #[serde(default = "default_experiment_name")]
    pub name: String,
    /// Experiment root; may reference environment variables.
    #[serde(default)]
    pub exp_dir: Option<String>,
    /// Number of times the run list is repeated.
    #[serde(default)]
    pub repeat: Option<u32>,
}

impl Default for ExperimentMeta {
    fn default() -> Self {
        Self {
            name: default_experiment_name(),
            exp_dir: None,
            repeat: None,
        }
    }
}

fn default_experiment_name() -> String {
    "explore-experiment".to_string()
}

/// One entry of `runs`: scheduler options plus config fragments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOverride {
    pub sbatch: SchedulerOverride,
    pub config: ConfigOverride,
}

/// Per-category config fragments. An absent category resolves to the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<Mapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub train: Option<Mapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val: Option<Mapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Mapping>,
}

impl ExplorationSpec {
    /// Parse an exploration document.
    pub fn from_yaml(content: &str, origin: &Path) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| LaunchError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Read and parse an exploration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LaunchError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&content, path)
    }

    /// The run list after repeat-expansion. `repeat: 0` counts as 1.
    pub fn expanded_runs(&self) -> Result<Vec<RunOverride>> {
        let repeat = self.experiment.repeat.unwrap_or(1).max(1) as usize;
        let runs: Vec<RunOverride> = std::iter::repeat_n(&self.runs, repeat)
            .flatten()
            .cloned()
            .collect();

        if runs.is_empty() {
            return Err(LaunchError::validation(format!(
                "exploration '{}' defines no runs",
                self.experiment.name
            )));
        }
        Ok(runs)
    }

    /// Directory that will hold the experiment directory.
    ///
    /// The CLI override wins, then the file's `exp_dir`, then
    /// `$<scratch_env>/<experiments_subdir>`.
    pub fn experiment_root<F>(
        &self,
        cli_override: Option<&Path>,
        settings: &LauncherSettings,
        lookup: F,
    ) -> Result<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = cli_override {
            return Ok(dir.to_path_buf());
        }
        if let Some(dir) = &self.experiment.exp_dir {
            return Ok(PathBuf::from(expand_env_with(dir, &lookup)));
        }
        match lookup(&settings.scratch_env) {
            Some(scratch) => Ok(PathBuf::from(scratch).join(&settings.experiments_subdir)),
            None => Err(LaunchError::configuration(format!(
                "no experiment directory: pass --exp_dir, set experiment.exp_dir, or export ${}",
                settings.scratch_env
            ))),
        }
    }
}

/// Locate an exploration file given as a bare name.
///
/// A path that exists is used as is. Otherwise `.yaml` is appended when
/// missing, and the name is looked up under `config/` unless it already
/// points there.
pub fn resolve_exploration_path(name: &str) -> PathBuf {
    if Path::new(name).exists() {
        return PathBuf::from(name);
    }
    let mut candidate = name.to_string();
    if !candidate.ends_with(".yaml") {
        candidate.push_str(".yaml");
    }
    if !candidate.contains("config") {
        candidate = format!("config/{candidate}");
    }
    PathBuf::from(candidate)
}
