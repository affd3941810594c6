//! Cumulus CLI: expand an exploration file into SLURM training jobs.
//!
//! Every run of the exploration gets its own directory, config file and batch
//! script. Scripts are handed to the scheduler unless `--test_mode` is set.

mod report;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use cumulus_core::template::supported_profiles;
use cumulus_core::{
    ClusterProfile, DefaultConfig, ExplorationSpec, ExploreOptions, Explorer, LaunchError,
    resolve_exploration_path,
};

/// Cumulus: launch a hyper-parameter exploration on the cluster
#[derive(Parser, Debug)]
#[command(name = "cumulus", version, about, long_about = None)]
struct Cli {
    /// Exploration file (looked up under config/ when not found as given)
    #[arg(short = 'e', long = "exploration_file", default_value = "explore.yaml")]
    exploration_file: String,

    /// Experiment root, overrides experiment.exp_dir
    #[arg(short = 'd', long = "exp_dir")]
    exp_dir: Option<PathBuf>,

    /// Cluster profile: mila or beluga
    #[arg(short = 't', long = "template_name")]
    template_name: Option<String>,

    /// Write every file but do not submit anything
    #[arg(long = "test_mode")]
    test_mode: bool,

    /// Number of leading runs sent to the main partition
    #[arg(short = 'p', long = "main_partitions", default_value_t = 0)]
    main_partitions: usize,

    /// Defaults file, overrides the launcher setting
    #[arg(long)]
    defaults: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn profile(&self) -> Result<ClusterProfile, LaunchError> {
        match &self.template_name {
            Some(name) => name.parse(),
            None => Err(LaunchError::configuration(format!(
                "no cluster profile given, pass -t with one of: {}",
                supported_profiles()
            ))),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("org", "cumulus", "cumulus")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "cumulus.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    // No experiment files are written before the profile is known to be valid.
    let profile = cli.profile()?;

    let workspace = std::env::current_dir().context("cannot determine working directory")?;
    let mut settings =
        cumulus_core::load_settings(Some(&workspace)).context("loading launcher settings")?;
    if let Some(defaults) = &cli.defaults {
        settings.defaults_file = defaults.clone();
    }

    let exploration_path = resolve_exploration_path(&cli.exploration_file);
    let spec = ExplorationSpec::load(&exploration_path)
        .with_context(|| format!("loading exploration file {}", exploration_path.display()))?;
    let defaults = DefaultConfig::load(&settings.defaults_file).with_context(|| {
        format!("loading defaults file {}", settings.defaults_file.display())
    })?;

    tracing::debug!(
        exploration = %exploration_path.display(),
        defaults = %settings.defaults_file.display(),
        %profile,
        "Loaded exploration"
    );

    let explorer = Explorer::new(settings, defaults, cli.test_mode)?;
    let options = ExploreOptions {
        profile,
        exp_dir: cli.exp_dir.clone(),
        main_partitions: cli.main_partitions,
    };
    let report = explorer.run(&spec, &options).await?;

    print!("{}", report::render_report(&report));

    if !report.is_success() {
        anyhow::bail!(
            "{} of {} run(s) failed",
            report.failed(),
            report.runs.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_match_launcher_surface() {
        let cli = Cli::parse_from([
            "cumulus",
            "-e",
            "sweep",
            "-d",
            "/scratch/exps",
            "-t",
            "beluga",
            "--test_mode",
            "-p",
            "2",
        ]);
        assert_eq!(cli.exploration_file, "sweep");
        assert_eq!(cli.exp_dir, Some(PathBuf::from("/scratch/exps")));
        assert!(cli.test_mode);
        assert_eq!(cli.main_partitions, 2);
        assert_eq!(cli.profile().unwrap(), ClusterProfile::Beluga);
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["cumulus"]);
        assert_eq!(cli.exploration_file, "explore.yaml");
        assert_eq!(cli.main_partitions, 0);
        assert!(!cli.test_mode);
        assert!(cli.defaults.is_none());
    }

    #[test]
    fn test_missing_or_unknown_profile_is_configuration_error() {
        let cli = Cli::parse_from(["cumulus"]);
        assert!(matches!(
            cli.profile(),
            Err(LaunchError::Configuration { .. })
        ));

        let cli = Cli::parse_from(["cumulus", "-t", "narval"]);
        let err = cli.profile().unwrap_err();
        assert!(matches!(err, LaunchError::Configuration { .. }));
        assert!(err.to_string().contains("mila"));
    }
}
