//! # cumulus-core: exploration launcher
//!
//! Turns an exploration file (a base configuration plus a list of per-run
//! overrides) into one directory, config file and SLURM batch script per run,
//! and submits each script as an independent job.
//!
//! Pipeline, leaves first:
//! 1. [`merge`]: defaults + override -> resolved configuration
//! 2. [`materialize`]: experiment/run directories and config files
//! 3. [`template`]: batch scripts per cluster profile
//! 4. [`submit`]: hand scripts to the scheduler (or not, in dry-run mode)
//!
//! [`explorer::Explorer`] drives the whole thing.

pub mod config;
pub mod error;
pub mod explore;
pub mod explorer;
pub mod materialize;
pub mod merge;
pub mod options;
pub mod paths;
pub mod submit;
pub mod template;

pub use config::{LauncherSettings, load_settings};
pub use error::LaunchError;
pub use explore::{ExplorationSpec, RunOverride, resolve_exploration_path};
pub use explorer::{ExplorationReport, ExploreOptions, Explorer, RunOutcome};
pub use merge::{DefaultConfig, ResolvedConfig, ResolvedRun};
pub use options::{SchedulerOptions, Telemetry};
pub use submit::{JobSubmitter, SubmissionResult};
pub use template::{ClusterProfile, ScriptTemplater};
