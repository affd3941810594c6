//! Batch-script templating for the supported cluster profiles.
//!
//! Every profile is a Handlebars template plus a set of resource directives.
//! Rendering is pure: the only filesystem access is checking whether the
//! dataset archive already exists, which decides whether the script packs it.

use handlebars::Handlebars;
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::LauncherSettings;
use crate::error::{LaunchError, Result};
use crate::materialize::MaterializedRun;
use crate::merge::{Category, ResolvedConfig};
use crate::options::SchedulerOptions;
use crate::paths::expand_env;

const STAGING_TEMPLATE: &str = "staging";

/// Clusters the launcher knows how to write scripts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterProfile {
    /// Mila cluster: conda environment, logs next to the run.
    Mila,
    /// Compute Canada Beluga: singularity image, account-billed.
    Beluga,
}

impl ClusterProfile {
    pub const ALL: [ClusterProfile; 2] = [ClusterProfile::Mila, ClusterProfile::Beluga];

    pub fn name(self) -> &'static str {
        match self {
            ClusterProfile::Mila => "mila",
            ClusterProfile::Beluga => "beluga",
        }
    }

    fn template(self) -> &'static str {
        match self {
            ClusterProfile::Mila => include_str!("../templates/mila.sh.hbs"),
            ClusterProfile::Beluga => include_str!("../templates/beluga.sh.hbs"),
        }
    }

    /// `#SBATCH` lines for this profile.
    pub fn directives(self, sbatch: &SchedulerOptions, run_dir: &Path) -> Vec<String> {
        let mut lines = Vec::new();
        if let (ClusterProfile::Beluga, Some(account)) = (self, &sbatch.account) {
            lines.push(format!("--account={account}"));
        }
        lines.push(format!("--cpus-per-task={}", sbatch.cpus));
        lines.push(format!("--gres={}", sbatch.gpu));
        lines.push(format!("--mem={}G", sbatch.mem));
        lines.push(format!("--time={}", sbatch.runtime));
        match self {
            ClusterProfile::Mila => {
                lines.push(format!("-o {}/slurm-%j.out", run_dir.display()));
            }
            ClusterProfile::Beluga => {
                lines.push(format!("-o {}", expand_env(&sbatch.slurm_out).display()));
            }
        }
        if sbatch.use_main_partition {
            lines.push("-p main".to_string());
        }
        lines.into_iter().map(|l| format!("#SBATCH {l}")).collect()
    }
}

impl fmt::Display for ClusterProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ClusterProfile {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self> {
        ClusterProfile::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| {
                LaunchError::configuration(format!(
                    "unknown cluster profile '{s}'; expected one of: {}",
                    supported_profiles()
                ))
            })
    }
}

/// Comma-separated list of profile names, for error messages and help text.
pub fn supported_profiles() -> String {
    ClusterProfile::ALL
        .iter()
        .map(|p| p.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// How the dataset gets onto node-local scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPlan {
    pub original_dir: PathBuf,
    pub zip_name: String,
    pub zip_path: PathBuf,
    /// The archive does not exist yet and the script must build it.
    pub create_archive: bool,
}

impl StagingPlan {
    /// The archive lives at `<original>/<original name>.zip`.
    pub fn for_dataset(original: &Path) -> Self {
        let original_dir = original
            .canonicalize()
            .or_else(|_| std::path::absolute(original))
            .unwrap_or_else(|_| original.to_path_buf());
        let name = original_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string());
        let zip_name = format!("{name}.zip");
        let zip_path = original_dir.join(&zip_name);
        let create_archive = !zip_path.exists();
        Self {
            original_dir,
            zip_name,
            zip_path,
            create_archive,
        }
    }
}

/// Renders batch scripts. Templates are parsed once at construction.
pub struct ScriptTemplater {
    registry: Handlebars<'static>,
    node_local_env: String,
    archive_subdirs: Vec<String>,
}

impl ScriptTemplater {
    pub fn new(settings: &LauncherSettings) -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_template_string(
            STAGING_TEMPLATE,
            include_str!("../templates/staging.sh.hbs"),
        )?;
        for profile in ClusterProfile::ALL {
            registry.register_template_string(profile.name(), profile.template())?;
        }
        Ok(Self {
            registry,
            node_local_env: settings.node_local_env.clone(),
            archive_subdirs: settings.archive_subdirs.clone(),
        })
    }

    /// Data-staging preamble for a dataset.
    pub fn render_staging(&self, plan: &StagingPlan) -> Result<String> {
        let ctx = json!({
            "create_archive": plan.create_archive,
            "node_local_env": self.node_local_env,
            "original_dir": plan.original_dir.display().to_string(),
            "zip_name": plan.zip_name,
            "zip_path": plan.zip_path.display().to_string(),
            "archive_subdirs": self.archive_subdirs.join(" "),
        });
        Ok(self.registry.render(STAGING_TEMPLATE, &ctx)?)
    }

    /// Render the batch script for one materialized run.
    ///
    /// `config` must carry `data.original_path`, i.e. be the rewritten config
    /// that was written to `config_path`.
    pub fn render(
        &self,
        sbatch: &SchedulerOptions,
        config: &ResolvedConfig,
        config_path: &Path,
        run_dir: &Path,
        profile: ClusterProfile,
    ) -> Result<String> {
        let original = config
            .get_str(Category::Data, crate::materialize::ORIGINAL_PATH_KEY)
            .ok_or_else(|| LaunchError::validation("data.original_path is not set"))?;
        let staging = self.render_staging(&StagingPlan::for_dataset(Path::new(original)))?;

        let ctx = json!({
            "directives": profile.directives(sbatch, run_dir).join("\n"),
            "staging": staging.trim_end(),
            "code_dir": sbatch.code_dir,
            "conda_env": sbatch.conda_env,
            "singularity_path": sbatch.singularity_path,
            "binds": singularity_binds(config, run_dir),
            "message": shell_quote_inner(&sbatch.message),
            "config_path": config_path.display().to_string(),
            "run_dir": run_dir.display().to_string(),
            "telemetry_flag": sbatch.telemetry().flag().unwrap_or(""),
        });
        Ok(self.registry.render(profile.name(), &ctx)?)
    }

    /// Shorthand for [`ScriptTemplater::render`] on a materialized run.
    pub fn render_run(
        &self,
        sbatch: &SchedulerOptions,
        run: &MaterializedRun,
        profile: ClusterProfile,
    ) -> Result<String> {
        self.render(
            sbatch,
            &run.config,
            &run.config_path,
            &run.run_dir.path,
            profile,
        )
    }
}

/// Paths the container needs: data, run directory, and optionally the
/// initial checkpoint and preprocessed data.
fn singularity_binds(config: &ResolvedConfig, run_dir: &Path) -> String {
    let mut binds = Vec::new();
    if let Some(data) = config.data_path() {
        binds.push(data.to_string());
    }
    binds.push(run_dir.display().to_string());
    let optional = [
        config.get_str(Category::Train, "init_chkpt_dir"),
        config.get_str(Category::Data, "preprocessed_data_path"),
    ];
    binds.extend(
        optional
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .map(str::to_string),
    );
    binds.join(",")
}

/// Escape a value for use between double quotes in bash.
fn shell_quote_inner(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
