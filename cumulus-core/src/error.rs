//! Error types for the Cumulus launcher.
//!
//! Uses `thiserror` for public API error types. Every variant carries enough
//! context (run index, field name, path, scheduler output) to diagnose a
//! failed exploration without re-running it.

use std::path::PathBuf;

/// Top-level error type for the launcher library.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Validation error in run {run}: missing mandatory field '{field}'")]
    MissingField { run: usize, field: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Failed to create directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Submission of {} failed: {message}", script.display())]
    Submission { script: PathBuf, message: String },

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Template error: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("Template syntax error: {0}")]
    TemplateSyntax(#[from] handlebars::TemplateError),

    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LaunchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn directory(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Directory {
            path: path.into(),
            source,
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    pub fn submission(script: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Submission {
            script: script.into(),
            message: message.into(),
        }
    }

    /// Whether this error is detected before anything touches the filesystem.
    ///
    /// Such errors abort the whole exploration; the others are attributed to a
    /// single run.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::MissingField { .. } | Self::Configuration { .. }
        )
    }
}

/// Convenience alias used across the launcher.
pub type Result<T> = std::result::Result<T, LaunchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_message_names_run_and_field() {
        let err = LaunchError::MissingField {
            run: 3,
            field: "data.path".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("run 3"));
        assert!(msg.contains("data.path"));
    }

    #[test]
    fn test_preflight_classification() {
        assert!(LaunchError::validation("no runs").is_preflight());
        assert!(LaunchError::configuration("unknown profile").is_preflight());
        assert!(!LaunchError::submission("/tmp/run.sh", "exit 1").is_preflight());
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!LaunchError::directory("/tmp/x", io).is_preflight());
    }

    #[test]
    fn test_write_error_names_the_file() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = LaunchError::write("/exp/run_0/overwritable_conf.yaml", io);
        assert!(!err.is_preflight());
        assert!(
            err.to_string()
                .contains("Failed to write /exp/run_0/overwritable_conf.yaml")
        );
    }
}
