//! Path helpers: environment-variable expansion and non-colliding names.

use std::path::{Path, PathBuf};

/// Expand `$VAR`, `${VAR}` and a leading `~` using the process environment.
///
/// Unset variables are left verbatim so the failure shows up in the path the
/// user sees rather than as a silently truncated one.
pub fn expand_env(input: &str) -> PathBuf {
    PathBuf::from(expand_env_with(input, |name| std::env::var(name).ok()))
}

/// Same as [`expand_env`] with an explicit variable lookup.
pub fn expand_env_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    if let Some(stripped) = rest.strip_prefix('~') {
        if stripped.is_empty() || stripped.starts_with('/') {
            match lookup("HOME") {
                Some(home) => out.push_str(&home),
                None => out.push('~'),
            }
            rest = stripped;
        }
    }

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        if name.is_empty() {
            out.push('$');
            rest = after;
            continue;
        }

        match lookup(name) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

/// Return `candidate` if nothing exists there, otherwise the first free
/// sibling among `<name>_1`, `<name>_2`, ...
pub fn increasable_name(candidate: &Path) -> PathBuf {
    if !candidate.exists() {
        return candidate.to_path_buf();
    }

    let name = candidate
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = candidate.parent().unwrap_or_else(|| Path::new(""));

    let mut counter = 1usize;
    loop {
        let sibling = parent.join(format!("{name}_{counter}"));
        if !sibling.exists() {
            return sibling;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/alice".into()),
            "SCRATCH" => Some("/scratch/alice".into()),
            _ => None,
        }
    }

    #[test]
    fn test_expand_plain_and_braced() {
        assert_eq!(
            expand_env_with("$SCRATCH/clouds", env),
            "/scratch/alice/clouds"
        );
        assert_eq!(
            expand_env_with("${SCRATCH}_x/logs", env),
            "/scratch/alice_x/logs"
        );
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_env_with("~/logs", env), "/home/alice/logs");
        assert_eq!(expand_env_with("~bob/logs", env), "~bob/logs");
    }

    #[test]
    fn test_unset_variable_left_verbatim() {
        assert_eq!(expand_env_with("$NOPE/a", env), "$NOPE/a");
        assert_eq!(expand_env_with("${NOPE}/a", env), "${NOPE}/a");
    }

    #[test]
    fn test_lone_dollar_is_kept() {
        assert_eq!(expand_env_with("cost$ 5", env), "cost$ 5");
        assert_eq!(expand_env_with("slurm-%j$", env), "slurm-%j$");
    }

    #[test]
    fn test_increasable_name_free() {
        let dir = TempDir::new().unwrap();
        let candidate = dir.path().join("exp");
        assert_eq!(increasable_name(&candidate), candidate);
    }

    #[test]
    fn test_increasable_name_skips_taken() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("exp")).unwrap();
        std::fs::create_dir(dir.path().join("exp_1")).unwrap();
        assert_eq!(
            increasable_name(&dir.path().join("exp")),
            dir.path().join("exp_2")
        );
    }
}
