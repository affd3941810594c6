//! Scheduler options: the `sbatch` part of a run.

use serde::{Deserialize, Serialize};

/// Fully populated scheduler parameters for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerOptions {
    /// CPUs per task.
    pub cpus: u32,
    /// Generic resource string passed to `--gres`.
    pub gpu: String,
    /// Memory in GB.
    pub mem: u32,
    /// Wall-clock limit (`HH:MM:SS`).
    pub runtime: String,
    /// Log path for profiles that don't log into the run directory.
    pub slurm_out: String,
    /// Human-readable message forwarded to the training entry point.
    pub message: String,
    /// Stem of the run config file and batch script.
    pub conf_name: String,
    /// Container image used by singularity-based profiles.
    pub singularity_path: String,
    /// Allocation account, when the cluster requires one.
    pub account: Option<String>,
    /// Checkout of the training code on the cluster.
    pub code_dir: String,
    /// Conda environment activated by conda-based profiles.
    pub conda_env: String,
    /// Log experiment telemetry offline.
    pub offline: bool,
    /// Disable experiment telemetry entirely. Wins over `offline`.
    pub no_comet: bool,
    /// Request the preferential `main` partition.
    pub use_main_partition: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            cpus: 8,
            gpu: "gpu:1".to_string(),
            mem: 32,
            runtime: "12:00:00".to_string(),
            slurm_out: "$HOME/logs/clouds-job-%j.out".to_string(),
            message: "explore exp run 12h".to_string(),
            conf_name: "overwritable_conf".to_string(),
            singularity_path: "/scratch/sankarak/images/clouds.img".to_string(),
            account: None,
            code_dir: "$HOME/clouds_dist".to_string(),
            conda_env: "clouds".to_string(),
            offline: true,
            no_comet: false,
            use_main_partition: false,
        }
    }
}

/// Partial scheduler options as written in an exploration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerOverride {
    pub cpus: Option<u32>,
    pub gpu: Option<String>,
    pub mem: Option<u32>,
    pub runtime: Option<String>,
    pub slurm_out: Option<String>,
    pub message: Option<String>,
    pub conf_name: Option<String>,
    pub singularity_path: Option<String>,
    pub account: Option<String>,
    pub code_dir: Option<String>,
    pub conda_env: Option<String>,
    pub offline: Option<bool>,
    pub no_comet: Option<bool>,
    pub use_main_partition: Option<bool>,
}

impl SchedulerOptions {
    /// Shallow merge: every field set in `overlay` replaces the default.
    pub fn merged(&self, overlay: &SchedulerOverride) -> Self {
        fn pick<T: Clone>(over: &Option<T>, base: &T) -> T {
            over.clone().unwrap_or_else(|| base.clone())
        }

        Self {
            cpus: pick(&overlay.cpus, &self.cpus),
            gpu: pick(&overlay.gpu, &self.gpu),
            mem: pick(&overlay.mem, &self.mem),
            runtime: pick(&overlay.runtime, &self.runtime),
            slurm_out: pick(&overlay.slurm_out, &self.slurm_out),
            message: pick(&overlay.message, &self.message),
            conf_name: pick(&overlay.conf_name, &self.conf_name),
            singularity_path: pick(&overlay.singularity_path, &self.singularity_path),
            account: overlay.account.clone().or_else(|| self.account.clone()),
            code_dir: pick(&overlay.code_dir, &self.code_dir),
            conda_env: pick(&overlay.conda_env, &self.conda_env),
            offline: pick(&overlay.offline, &self.offline),
            no_comet: pick(&overlay.no_comet, &self.no_comet),
            use_main_partition: pick(&overlay.use_main_partition, &self.use_main_partition),
        }
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry::from_flags(self.no_comet, self.offline)
    }

    /// Config file name inside the run directory, always ending in `.yaml`.
    pub fn conf_file_name(&self) -> String {
        if self.conf_name.ends_with(".yaml") {
            self.conf_name.clone()
        } else {
            format!("{}.yaml", self.conf_name)
        }
    }

    /// Batch script name inside the run directory.
    pub fn script_file_name(&self) -> String {
        let stem = self
            .conf_name
            .strip_suffix(".yaml")
            .unwrap_or(&self.conf_name);
        format!("run-{stem}.sh")
    }
}

/// How the training run reports to the experiment tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Telemetry {
    Online,
    Offline,
    Disabled,
}

impl Telemetry {
    /// Disabled wins over offline, which wins over the online default.
    pub fn from_flags(disabled: bool, offline: bool) -> Self {
        if disabled {
            Self::Disabled
        } else if offline {
            Self::Offline
        } else {
            Self::Online
        }
    }

    /// Flag understood by the training entry point.
    pub fn flag(self) -> Option<&'static str> {
        match self {
            Self::Online => None,
            Self::Offline => Some("-f"),
            Self::Disabled => Some("-n"),
        }
    }
}

impl std::fmt::Display for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Telemetry::Online => write!(f, "online"),
            Telemetry::Offline => write!(f, "offline"),
            Telemetry::Disabled => write!(f, "disabled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_override_keeps_defaults() {
        let defaults = SchedulerOptions::default();
        assert_eq!(defaults.merged(&SchedulerOverride::default()), defaults);
    }

    #[test]
    fn test_override_wins() {
        let defaults = SchedulerOptions::default();
        let merged = defaults.merged(&SchedulerOverride {
            mem: Some(64),
            message: Some("lr sweep".into()),
            account: Some("rpp-bengioy".into()),
            ..Default::default()
        });
        assert_eq!(merged.mem, 64);
        assert_eq!(merged.message, "lr sweep");
        assert_eq!(merged.account.as_deref(), Some("rpp-bengioy"));
        assert_eq!(merged.cpus, defaults.cpus);
        assert_eq!(merged.runtime, defaults.runtime);
    }

    #[test]
    fn test_telemetry_precedence() {
        assert_eq!(Telemetry::from_flags(true, true), Telemetry::Disabled);
        assert_eq!(Telemetry::from_flags(true, false), Telemetry::Disabled);
        assert_eq!(Telemetry::from_flags(false, true), Telemetry::Offline);
        assert_eq!(Telemetry::from_flags(false, false), Telemetry::Online);
        assert_eq!(Telemetry::Disabled.flag(), Some("-n"));
        assert_eq!(Telemetry::Online.flag(), None);
    }

    #[test]
    fn test_file_names() {
        let mut opts = SchedulerOptions::default();
        assert_eq!(opts.conf_file_name(), "overwritable_conf.yaml");
        assert_eq!(opts.script_file_name(), "run-overwritable_conf.sh");
        opts.conf_name = "lr.yaml".into();
        assert_eq!(opts.conf_file_name(), "lr.yaml");
        assert_eq!(opts.script_file_name(), "run-lr.sh");
    }

    #[test]
    fn test_unknown_override_key_rejected() {
        let parsed: Result<SchedulerOverride, _> = serde_yaml::from_str("cpu: 4\n");
        assert!(parsed.is_err());
    }
}
