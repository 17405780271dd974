use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "reprospective";
const CONFIG_ENV: &str = "REPROSPECTIVE_CONFIG";
const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralSettings {
    /// Postgres URL. Without one the agent only buffers locally and watches
    /// the static directory list.
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// How long one sync batch waits for a pooled connection before the run
    /// counts it failed.
    pub acquire_timeout_secs: u64,
}

impl Default for CentralSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            acquire_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub interval_secs: u64,
    pub batch_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Static directory list: the fallback watch set and the seed for an
    /// empty central table.
    pub directories: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub buffer_max_events: usize,
    pub flush_interval_secs: u64,
    pub reconcile_interval_secs: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            exclude_patterns: [r"\.git/", r"\.swp$", r"\.tmp$", r"~$"]
                .map(String::from)
                .to_vec(),
            buffer_max_events: 100,
            flush_interval_secs: 10,
            reconcile_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesktopSettings {
    pub enabled: bool,
    pub poll_interval_secs: u64,
}

impl Default for DesktopSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    pub enabled: bool,
    pub idle_timeout_secs: u64,
    pub timeout_check_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_timeout_secs: 120,
            timeout_check_secs: 10,
            poll_interval_secs: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub local_db_path: PathBuf,
    pub central: CentralSettings,
    pub sync: SyncSettings,
    pub watch: WatchSettings,
    pub desktop: DesktopSettings,
    pub input: InputSettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            local_db_path: data_dir.join("agent.sqlite3"),
            central: CentralSettings::default(),
            sync: SyncSettings::default(),
            watch: WatchSettings::default(),
            desktop: DesktopSettings::default(),
            input: InputSettings::default(),
        }
    }
}

impl AgentSettings {
    /// `$REPROSPECTIVE_CONFIG`, else `<config dir>/reprospective/agent.json`.
    pub fn default_path() -> PathBuf {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("agent.json"),
        }
    }

    /// Read settings from the default location with environment overrides
    /// applied.
    pub fn load_default() -> Result<Self> {
        let mut settings = Self::load(&Self::default_path())?;
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// A missing file means defaults. Fields absent from the file keep their
    /// defaults too.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("no settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings in {}", path.display()))
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(DATABASE_URL_ENV).filter(|url| !url.trim().is_empty()) {
            self.central.database_url = Some(url);
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs.max(1))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.central.acquire_timeout_secs.max(1))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.watch.reconcile_interval_secs.max(1))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.watch.flush_interval_secs.max(1))
    }

    pub fn desktop_poll_interval(&self) -> Duration {
        Duration::from_secs(self.desktop.poll_interval_secs.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.input.idle_timeout_secs)
    }

    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_secs(self.input.timeout_check_secs.max(1))
    }

    pub fn input_poll_interval(&self) -> Duration {
        Duration::from_secs(self.input.poll_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AgentSettings::load(&dir.path().join("agent.json")).unwrap();
        assert_eq!(settings.sync.batch_size, 100);
        assert_eq!(settings.sync_interval(), Duration::from_secs(300));
        assert_eq!(settings.reconcile_interval(), Duration::from_secs(60));
        assert_eq!(settings.acquire_timeout(), Duration::from_secs(10));
        assert_eq!(settings.input.idle_timeout_secs, 120);
        assert_eq!(settings.watch.exclude_patterns.len(), 4);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        fs::write(
            &path,
            r#"{ "sync": { "batch_size": 25 }, "watch": { "directories": ["~/code"] } }"#,
        )
        .unwrap();

        let settings = AgentSettings::load(&path).unwrap();
        assert_eq!(settings.sync.batch_size, 25);
        assert_eq!(settings.sync.interval_secs, 300);
        assert_eq!(settings.watch.directories, ["~/code"]);
        assert_eq!(settings.watch.buffer_max_events, 100);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(AgentSettings::load(&path).is_err());
    }

    #[test]
    fn database_url_comes_from_the_environment() {
        let mut settings = AgentSettings::default();
        settings.central.database_url = Some("postgres://file".into());

        settings.apply_env(|_| Some("   ".into()));
        assert_eq!(settings.central.database_url.as_deref(), Some("postgres://file"));

        settings.apply_env(|key| {
            (key == "DATABASE_URL").then(|| "postgres://agent@central/reprospective".to_string())
        });
        assert_eq!(
            settings.central.database_url.as_deref(),
            Some("postgres://agent@central/reprospective")
        );
    }
}
