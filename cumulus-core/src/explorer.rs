//! Exploration orchestration: resolve every run, then materialize, render and
//! submit them one at a time.
//!
//! Validation and configuration problems abort before anything is written.
//! Once the experiment directory exists, a failing run is recorded in the
//! report and the remaining runs still go through.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::LauncherSettings;
use crate::error::{LaunchError, Result};
use crate::explore::ExplorationSpec;
use crate::materialize::{ExperimentDirectory, materialize};
use crate::merge::{DefaultConfig, ResolvedRun, resolve_runs};
use crate::options::SchedulerOptions;
use crate::submit::{JobSubmitter, SubmissionResult};
use crate::template::{ClusterProfile, ScriptTemplater};

/// Invocation-level choices, typically straight from the CLI.
#[derive(Debug, Clone)]
pub struct ExploreOptions {
    pub profile: ClusterProfile,
    /// Overrides the exploration file's `exp_dir`.
    pub exp_dir: Option<PathBuf>,
    /// Number of leading runs that request the `main` partition.
    pub main_partitions: usize,
}

/// Outcome of one run.
#[derive(Debug)]
pub struct RunOutcome {
    pub index: usize,
    pub run_dir: PathBuf,
    pub script_path: Option<PathBuf>,
    pub result: Result<SubmissionResult>,
}

impl RunOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Everything an exploration produced.
#[derive(Debug)]
pub struct ExplorationReport {
    pub experiment_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub runs: Vec<RunOutcome>,
}

impl ExplorationReport {
    pub fn failed(&self) -> usize {
        self.runs.iter().filter(|r| !r.is_ok()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Drives one exploration from parsed file to submitted jobs.
pub struct Explorer {
    settings: LauncherSettings,
    defaults: DefaultConfig,
    scheduler_defaults: SchedulerOptions,
    templater: ScriptTemplater,
    submitter: JobSubmitter,
}

impl Explorer {
    pub fn new(settings: LauncherSettings, defaults: DefaultConfig, dry_run: bool) -> Result<Self> {
        let templater = ScriptTemplater::new(&settings)?;
        let submitter = JobSubmitter::new(settings.scheduler_command.clone(), dry_run);
        Ok(Self {
            settings,
            defaults,
            scheduler_defaults: SchedulerOptions::default(),
            templater,
            submitter,
        })
    }

    /// Replace the built-in scheduler defaults.
    pub fn with_scheduler_defaults(mut self, defaults: SchedulerOptions) -> Self {
        self.scheduler_defaults = defaults;
        self
    }

    /// Run the exploration using the process environment for `exp_dir`
    /// expansion and the scratch fallback.
    pub async fn run(
        &self,
        spec: &ExplorationSpec,
        options: &ExploreOptions,
    ) -> Result<ExplorationReport> {
        self.run_with_env(spec, options, |name| std::env::var(name).ok())
            .await
    }

    pub async fn run_with_env<F>(
        &self,
        spec: &ExplorationSpec,
        options: &ExploreOptions,
        lookup: F,
    ) -> Result<ExplorationReport>
    where
        F: Fn(&str) -> Option<String>,
    {
        let started_at = Utc::now();

        // Everything that can be checked without touching the disk.
        let runs = resolve_runs(
            spec,
            &self.defaults,
            &self.scheduler_defaults,
            options.main_partitions,
        )?;
        let root = spec.experiment_root(options.exp_dir.as_deref(), &self.settings, lookup)?;

        let experiment = ExperimentDirectory::create(&root, &spec.experiment.name)?;
        info!(
            experiment = %experiment.path().display(),
            runs = runs.len(),
            profile = %options.profile,
            dry_run = self.submitter.is_dry_run(),
            "Starting exploration"
        );

        let mut outcomes = Vec::with_capacity(runs.len());
        for run in &runs {
            let outcome = self.process_run(&experiment, run, options.profile).await;
            match &outcome.result {
                Ok(result) => info!(
                    run = run.index,
                    dir = %outcome.run_dir.display(),
                    job_id = result.job_id().unwrap_or("-"),
                    "Run ready"
                ),
                Err(e) => error!(
                    run = run.index,
                    dir = %outcome.run_dir.display(),
                    error = %e,
                    "Run failed"
                ),
            }
            outcomes.push(outcome);
        }

        let report = ExplorationReport {
            experiment_dir: experiment.path().to_path_buf(),
            started_at,
            runs: outcomes,
        };
        if !report.is_success() {
            warn!(
                failed = report.failed(),
                total = report.runs.len(),
                "Some runs failed"
            );
        }
        Ok(report)
    }

    async fn process_run(
        &self,
        experiment: &ExperimentDirectory,
        run: &ResolvedRun,
        profile: ClusterProfile,
    ) -> RunOutcome {
        let run_dir = experiment.run_path(run.index);
        let mut script_path = None;

        let result = async {
            let materialized =
                materialize(experiment, run, &self.settings.node_local_placeholder())?;
            let script = self.templater.render_run(&run.sbatch, &materialized, profile)?;

            let path = materialized.run_dir.path.join(run.sbatch.script_file_name());
            write_script(&path, &script)?;
            script_path = Some(path.clone());

            self.submitter.submit(&path).await
        }
        .await;

        RunOutcome {
            index: run.index,
            run_dir,
            script_path,
            result,
        }
    }
}

fn write_script(path: &Path, script: &str) -> Result<()> {
    std::fs::write(path, script).map_err(|e| LaunchError::write(path, e))
}
