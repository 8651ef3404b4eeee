use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{clog_debug, Error, Result};

/// Default concurrency cap: the conservative documented floor.
/// Callers may pass a higher cap per submission.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Default number of re-attempts after a failed or timed-out execution.
pub const DEFAULT_RETRY_LIMIT: u32 = 2;

/// Default fixed delay between retry attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default concurrency cap for new sessions.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Default retry limit for failed task attempts.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Fixed delay between retry attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Override for the state directory (sessions + checkpoints).
    pub state_dir: Option<String>,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_retry_limit() -> u32 {
    DEFAULT_RETRY_LIMIT
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            state_dir: None,
        }
    }
}

impl Config {
    pub fn convoy_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".convoy"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::convoy_dir()?.join("convoy.toml"))
    }

    /// Directory holding session manifests and checkpoints.
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Self::convoy_dir(),
        }
    }

    pub fn sessions_dir(&self) -> Result<PathBuf> {
        Ok(self.state_dir()?.join("sessions"))
    }

    pub fn checkpoints_dir(&self) -> Result<PathBuf> {
        Ok(self.state_dir()?.join("checkpoints"))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        clog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            clog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        clog_debug!(
            "Config loaded: concurrency={}, retry_limit={}, state_dir={:?}",
            config.concurrency,
            config.retry_limit,
            config.state_dir
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let convoy_dir = Self::convoy_dir()?;
        clog_debug!("Config::save convoy_dir={}", convoy_dir.display());
        if !convoy_dir.exists() {
            fs::create_dir_all(&convoy_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        clog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let sessions = self.sessions_dir()?;
        let checkpoints = self.checkpoints_dir()?;
        clog_debug!(
            "Config::ensure_dirs sessions={} checkpoints={}",
            sessions.display(),
            checkpoints.display()
        );
        if !sessions.exists() {
            fs::create_dir_all(&sessions)?;
        }
        if !checkpoints.exists() {
            fs::create_dir_all(&checkpoints)?;
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
