use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Display form and symlink-resolved form of a configured directory.
///
/// `resolved` is `None` when the path does not exist yet; such a target is
/// still accepted and simply watched once it appears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDir {
    pub display: PathBuf,
    pub resolved: Option<PathBuf>,
}

impl ResolvedDir {
    /// The path a watch handle should be registered on.
    pub fn watch_path(&self) -> &Path {
        self.resolved.as_deref().unwrap_or(&self.display)
    }
}

pub fn resolve_directory(input: &str) -> Result<ResolvedDir> {
    let trimmed = input.trim();
    let expanded = expand_home(trimmed);
    let display = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .context("failed to read current directory")?
            .join(expanded)
    };

    let resolved = if display.exists() {
        match std::fs::canonicalize(&display) {
            Ok(path) => Some(path),
            // Unreadable but present: watch it under the name we were given.
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                Some(display.clone())
            }
            Err(err) => {
                log::warn!("could not resolve {}: {err}", display.display());
                None
            }
        }
    } else {
        None
    };

    Ok(ResolvedDir { display, resolved })
}

/// `~` alone or a leading `~/` means the home directory.
fn expand_home(raw: &str) -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        if raw == "~" {
            return home;
        }
        if let Some(rest) = raw.strip_prefix("~/") {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Existing, a directory, and listable by this process.
pub fn check_accessible(path: &Path) -> std::result::Result<(), String> {
    let meta = std::fs::metadata(path).map_err(|err| format!("{}: {err}", path.display()))?;
    if !meta.is_dir() {
        return Err(format!("{} is not a directory", path.display()));
    }
    std::fs::read_dir(path)
        .map(|_| ())
        .map_err(|err| format!("{} is not readable: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_directory_resolves_to_itself() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().to_string_lossy().to_string();
        let resolved = resolve_directory(&input).unwrap();
        assert_eq!(
            resolved.resolved.as_deref(),
            Some(std::fs::canonicalize(dir.path()).unwrap().as_path())
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_resolves_to_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real");
        std::fs::create_dir(&target).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let resolved = resolve_directory(&link.to_string_lossy()).unwrap();
        assert_eq!(resolved.display, link);
        assert_eq!(
            resolved.watch_path(),
            std::fs::canonicalize(&target).unwrap().as_path()
        );
    }

    #[test]
    fn missing_directory_keeps_display_path() {
        let resolved = resolve_directory("/definitely/not/here/xyz").unwrap();
        assert_eq!(resolved.resolved, None);
        assert_eq!(resolved.watch_path(), Path::new("/definitely/not/here/xyz"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_home("~"), home);
        assert_eq!(expand_home("~/code"), home.join("code"));
        assert_eq!(expand_home("~other/code"), PathBuf::from("~other/code"));
        assert_eq!(resolve_directory("~").unwrap().display, home);
    }

    #[test]
    fn files_are_not_accessible_targets() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(check_accessible(file.path()).is_err());
        assert!(check_accessible(file.path().parent().unwrap()).is_ok());
    }
}
