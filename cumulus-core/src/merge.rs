//! Config merger: defaults + run override -> resolved configuration.
//!
//! Merging is a shallow key union per category. Nested mappings are replaced
//! wholesale, never merged recursively.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::Path;

use crate::error::{LaunchError, Result};
use crate::explore::{ConfigOverride, ExplorationSpec};
use crate::options::SchedulerOptions;

/// Key of the mandatory dataset location in the `data` category.
pub const DATA_PATH_KEY: &str = "path";

/// Default training configuration, loaded once from the defaults file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultConfig {
    #[serde(default)]
    pub model: Mapping,
    #[serde(default)]
    pub train: Mapping,
    #[serde(default)]
    pub val: Mapping,
    #[serde(default)]
    pub data: Mapping,
}

impl DefaultConfig {
    pub fn from_yaml(content: &str, origin: &Path) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| LaunchError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LaunchError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&content, path)
    }
}

/// Fully resolved configuration for one run. Same shape as the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub model: Mapping,
    pub train: Mapping,
    pub val: Mapping,
    pub data: Mapping,
}

impl ResolvedConfig {
    /// String value of `category.key`, if present and a string.
    pub fn get_str(&self, category: Category, key: &str) -> Option<&str> {
        self.category(category).get(key).and_then(Value::as_str)
    }

    /// Current `data.path`.
    pub fn data_path(&self) -> Option<&str> {
        self.get_str(Category::Data, DATA_PATH_KEY)
    }

    pub fn category(&self, category: Category) -> &Mapping {
        match category {
            Category::Model => &self.model,
            Category::Train => &self.train,
            Category::Val => &self.val,
            Category::Data => &self.data,
        }
    }

    /// View this config as an override fragment covering every category.
    pub fn as_override(&self) -> ConfigOverride {
        ConfigOverride {
            model: Some(self.model.clone()),
            train: Some(self.train.clone()),
            val: Some(self.val.clone()),
            data: Some(self.data.clone()),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Top-level configuration categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Model,
    Train,
    Val,
    Data,
}

/// Shallow union of two mappings; keys in `overlay` win.
pub fn merge_mapping(base: &Mapping, overlay: Option<&Mapping>) -> Mapping {
    let mut merged = base.clone();
    if let Some(overlay) = overlay {
        for (k, v) in overlay {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

/// Resolve one run's configuration.
///
/// `run` only labels the error when `data.path` is missing, empty or not a
/// string.
pub fn merge(
    defaults: &DefaultConfig,
    overlay: &ConfigOverride,
    run: usize,
) -> Result<ResolvedConfig> {
    let resolved = ResolvedConfig {
        model: merge_mapping(&defaults.model, overlay.model.as_ref()),
        train: merge_mapping(&defaults.train, overlay.train.as_ref()),
        val: merge_mapping(&defaults.val, overlay.val.as_ref()),
        data: merge_mapping(&defaults.data, overlay.data.as_ref()),
    };
    check_data_path(&resolved.data, run)?;
    Ok(resolved)
}

fn check_data_path(data: &Mapping, run: usize) -> Result<()> {
    match data.get(DATA_PATH_KEY) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(()),
        None | Some(Value::Null) | Some(Value::String(_)) => Err(LaunchError::MissingField {
            run,
            field: format!("data.{DATA_PATH_KEY}"),
        }),
        Some(other) => Err(LaunchError::validation(format!(
            "run {run}: data.{DATA_PATH_KEY} must be a path string, got {}",
            serde_yaml::to_string(other)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        ))),
    }
}

/// One run, fully resolved and ready to materialize.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRun {
    pub index: usize,
    pub sbatch: SchedulerOptions,
    pub config: ResolvedConfig,
}

/// Expand repeats and resolve every run before anything touches the disk.
///
/// The first `main_partitions` runs request the preferential partition.
pub fn resolve_runs(
    spec: &ExplorationSpec,
    defaults: &DefaultConfig,
    scheduler_defaults: &SchedulerOptions,
    main_partitions: usize,
) -> Result<Vec<ResolvedRun>> {
    spec.expanded_runs()?
        .iter()
        .enumerate()
        .map(|(index, run)| {
            let config = merge(defaults, &run.config, index)?;
            let mut sbatch = scheduler_defaults.merged(&run.sbatch);
            if index < main_partitions {
                sbatch.use_main_partition = true;
            }
            Ok(ResolvedRun {
                index,
                sbatch,
                config,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SchedulerOverride;

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn defaults() -> DefaultConfig {
        DefaultConfig::from_yaml(
            r#"
model:
  n_blocks: 5
  dropout: 0.25
train:
  lr: 0.0001
  n_epochs: 100
val:
  every: 10
data:
  path: /data/clouds
  with_stats: "on"
"#,
            Path::new("defaults.yaml"),
        )
        .unwrap()
    }

    #[test]
    fn test_absent_category_equals_default() {
        let defaults = defaults();
        let resolved = merge(&defaults, &ConfigOverride::default(), 0).unwrap();
        assert_eq!(resolved.model, defaults.model);
        assert_eq!(resolved.train, defaults.train);
        assert_eq!(resolved.val, defaults.val);
        assert_eq!(resolved.data, defaults.data);
    }

    #[test]
    fn test_override_wins_and_defaults_retained() {
        let defaults = defaults();
        let overlay = ConfigOverride {
            train: Some(mapping("lr: 0.01\nbatch_size: 8\n")),
            ..Default::default()
        };
        let resolved = merge(&defaults, &overlay, 0).unwrap();
        assert_eq!(resolved.train.get("lr"), Some(&Value::from(0.01)));
        assert_eq!(resolved.train.get("batch_size"), Some(&Value::from(8)));
        assert_eq!(resolved.train.get("n_epochs"), Some(&Value::from(100)));
    }

    #[test]
    fn test_nested_values_replaced_not_merged() {
        let mut defaults = defaults();
        defaults
            .model
            .insert("sched".into(), Value::Mapping(mapping("gamma: 0.5\nstep: 10\n")));
        let overlay = ConfigOverride {
            model: Some(mapping("sched:\n  gamma: 0.1\n")),
            ..Default::default()
        };
        let resolved = merge(&defaults, &overlay, 0).unwrap();
        assert_eq!(
            resolved.model.get("sched"),
            Some(&Value::Mapping(mapping("gamma: 0.1\n")))
        );
    }

    #[test]
    fn test_missing_data_path_is_rejected() {
        let mut defaults = defaults();
        defaults.data.remove(DATA_PATH_KEY);
        let err = merge(&defaults, &ConfigOverride::default(), 4).unwrap_err();
        match err {
            LaunchError::MissingField { run, field } => {
                assert_eq!(run, 4);
                assert_eq!(field, "data.path");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_or_null_data_path_is_rejected() {
        let defaults = defaults();
        for bad in ["path: ''\n", "path: ~\n", "path: '   '\n"] {
            let overlay = ConfigOverride {
                data: Some(mapping(bad)),
                ..Default::default()
            };
            assert!(merge(&defaults, &overlay, 0).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_non_string_data_path_is_rejected() {
        let defaults = defaults();
        for bad in ["path: 2024\n", "path: true\n", "path: [a, b]\n"] {
            let overlay = ConfigOverride {
                data: Some(mapping(bad)),
                ..Default::default()
            };
            let err = merge(&defaults, &overlay, 2).unwrap_err();
            assert!(err.is_preflight(), "{bad:?} gave {err}");
            assert!(err.to_string().contains("run 2"));
            assert!(err.to_string().contains("data.path"));
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let defaults = defaults();
        let overlay = ConfigOverride {
            model: Some(mapping("dropout: 0.5\n")),
            ..Default::default()
        };
        let once = merge(&defaults, &overlay, 0).unwrap();
        let as_defaults = DefaultConfig {
            model: once.model.clone(),
            train: once.train.clone(),
            val: once.val.clone(),
            data: once.data.clone(),
        };
        let twice = merge(&as_defaults, &ConfigOverride::default(), 0).unwrap();
        assert_eq!(once, twice);

        let reapplied = merge(&defaults, &once.as_override(), 0).unwrap();
        assert_eq!(once, reapplied);
    }

    #[test]
    fn test_resolve_runs_marks_main_partitions() {
        let spec = ExplorationSpec::from_yaml(
            "experiment:\n  repeat: 3\nruns:\n  - sbatch:\n      mem: 16\n",
            Path::new("e.yaml"),
        )
        .unwrap();
        let runs = resolve_runs(&spec, &defaults(), &SchedulerOptions::default(), 2).unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(
            runs.iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(runs[0].sbatch.use_main_partition);
        assert!(runs[1].sbatch.use_main_partition);
        assert!(!runs[2].sbatch.use_main_partition);
        assert!(runs.iter().all(|r| r.sbatch.mem == 16));
    }

    #[test]
    fn test_resolve_runs_reports_failing_index() {
        let mut defaults = defaults();
        defaults.data.remove(DATA_PATH_KEY);
        let spec = ExplorationSpec {
            experiment: Default::default(),
            runs: vec![
                crate::explore::RunOverride {
                    sbatch: SchedulerOverride::default(),
                    config: ConfigOverride {
                        data: Some(mapping("path: /data/a\n")),
                        ..Default::default()
                    },
                },
                Default::default(),
            ],
        };
        let err = resolve_runs(&spec, &defaults, &SchedulerOptions::default(), 0).unwrap_err();
        assert!(matches!(err, LaunchError::MissingField { run: 1, .. }));
    }
}
