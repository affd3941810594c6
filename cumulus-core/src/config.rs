//! Launcher settings.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment. Settings are loaded from
//! `~/.config/cumulus/config.toml` and/or `.cumulus/config.toml` in the
//! workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Settings that control how the launcher talks to the cluster.
///
/// These are properties of the installation, not of a single exploration, so
/// they never appear in exploration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherSettings {
    /// Defaults file holding the `model`/`train`/`val`/`data` categories.
    #[serde(default = "default_defaults_file")]
    pub defaults_file: PathBuf,
    /// Program receiving the batch script path.
    #[serde(default = "default_scheduler_command")]
    pub scheduler_command: String,
    /// Environment variable naming the shared scratch area. Used for the
    /// experiment root when neither the CLI nor the exploration file set one.
    #[serde(default = "default_scratch_env")]
    pub scratch_env: String,
    /// Environment variable naming node-local scratch on compute nodes.
    /// Only ever referenced inside generated scripts.
    #[serde(default = "default_node_local_env")]
    pub node_local_env: String,
    /// Experiment root relative to the scratch area.
    #[serde(default = "default_experiments_subdir")]
    pub experiments_subdir: PathBuf,
    /// Dataset subdirectories packed into the staging archive.
    #[serde(default = "default_archive_subdirs")]
    pub archive_subdirs: Vec<String>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            defaults_file: default_defaults_file(),
            scheduler_command: default_scheduler_command(),
            scratch_env: default_scratch_env(),
            node_local_env: default_node_local_env(),
            experiments_subdir: default_experiments_subdir(),
            archive_subdirs: default_archive_subdirs(),
        }
    }
}

impl LauncherSettings {
    /// Shell reference to node-local scratch, e.g. `$SLURM_TMPDIR`.
    pub fn node_local_placeholder(&self) -> String {
        format!("${}", self.node_local_env)
    }
}

fn default_defaults_file() -> PathBuf {
    PathBuf::from("shared/defaults.yaml")
}

fn default_scheduler_command() -> String {
    "sbatch".to_string()
}

fn default_scratch_env() -> String {
    "SCRATCH".to_string()
}

fn default_node_local_env() -> String {
    "SLURM_TMPDIR".to_string()
}

fn default_experiments_subdir() -> PathBuf {
    PathBuf::from("clouds").join("experiments")
}

fn default_archive_subdirs() -> Vec<String> {
    vec!["imgs".to_string(), "metos".to_string()]
}

/// Load launcher settings from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `CUMULUS_`)
/// 2. Workspace-local config (`.cumulus/config.toml`)
/// 3. User config (`~/.config/cumulus/config.toml`)
/// 4. Built-in defaults
pub fn load_settings(workspace: Option<&Path>) -> Result<LauncherSettings> {
    let mut figment = Figment::from(Serialized::defaults(LauncherSettings::default()));

    if let Some(dirs) = directories::ProjectDirs::from("org", "cumulus", "cumulus") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".cumulus").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // CUMULUS_SCHEDULER_COMMAND, CUMULUS_NODE_LOCAL_ENV, ...
    figment = figment.merge(Env::prefixed("CUMULUS_").split("__"));

    Ok(figment.extract::<LauncherSettings>().map_err(Box::new)?)
}
