use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use regex::{Regex, RegexSet};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Filtering and flushing rules shared by every watch handle.
#[derive(Debug, Clone)]
pub struct WatchPolicy {
    exclude: RegexSet,
    pub buffer_max: usize,
    pub flush_interval: Duration,
}

impl WatchPolicy {
    /// Patterns that fail to compile are logged and left out.
    pub fn new(patterns: &[String], buffer_max: usize, flush_interval: Duration) -> Result<Self> {
        let valid: Vec<&str> = patterns
            .iter()
            .filter(|pattern| match Regex::new(pattern) {
                Ok(_) => true,
                Err(err) => {
                    log_warn!("ignoring invalid exclude pattern '{pattern}': {err}");
                    false
                }
            })
            .map(String::as_str)
            .collect();

        Ok(Self {
            exclude: RegexSet::new(valid).context("failed to compile exclude patterns")?,
            buffer_max: buffer_max.max(1),
            flush_interval,
        })
    }

    /// Unanchored search against the full path.
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.is_match(&path.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> WatchPolicy {
        let patterns = [r"\.git/", r"\.swp$", r"\.tmp$", r"~$"].map(String::from);
        WatchPolicy::new(&patterns, 100, Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn default_patterns_match_anywhere_in_the_path() {
        let policy = defaults();
        assert!(policy.is_excluded(Path::new("/code/app/.git/index")));
        assert!(policy.is_excluded(Path::new("/code/app/.main.rs.swp")));
        assert!(policy.is_excluded(Path::new("/code/app/notes.txt~")));
        assert!(policy.is_excluded(Path::new("/code/app/build.tmp")));
        assert!(!policy.is_excluded(Path::new("/code/app/src/main.rs")));
        assert!(!policy.is_excluded(Path::new("/code/app/.gitignore")));
    }

    #[test]
    fn invalid_pattern_is_skipped() {
        let patterns = [String::from("(unclosed"), String::from(r"\.log$")];
        let policy = WatchPolicy::new(&patterns, 0, Duration::from_secs(1)).unwrap();
        assert!(policy.is_excluded(Path::new("/var/app.log")));
        assert!(!policy.is_excluded(Path::new("/var/app.txt")));
        assert_eq!(policy.buffer_max, 1);
    }
}
