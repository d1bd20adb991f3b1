use crate::lockfile::LockMode;
use anyhow::Context;
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const MAX_CONCURRENT_OPERATIONS: usize = 32;
/// Upper bound for `retry_delay_seconds` and `timeout_seconds`.
pub const MAX_DURATION_SECONDS: u64 = 24 * 60 * 60;

/// Local config files looked up in the working directory, in order.
pub const LOCAL_CONFIG_FILES: [&str; 2] = ["config.local.json", "config.json"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("GitHub owner is not set (set GITHUB_USER, --owner or \"owner\" in the config file)")]
    MissingOwner,
    #[error("clone destination is not set (use --dest or \"dest\" in the config file)")]
    MissingDestination,
    #[error("GitHub token is not set (set GITHUB_TOKEN or \"github_token\" in the config file)")]
    MissingToken,
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Settings for one sync run.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(alias = "github_username")]
    pub owner: String,
    pub github_token: Option<String>,
    #[serde(alias = "clone_destination")]
    pub dest: PathBuf,
    pub use_https: bool,
    pub sync_only: bool,
    pub auto_stash: bool,
    pub auto_prune: bool,
    pub auto_cleanup: bool,
    pub force: bool,
    pub skip_archived: bool,
    pub skip_forks: bool,
    pub max_concurrent_operations: usize,
    #[serde(alias = "max_retries")]
    pub retry_attempts: u32,
    pub retry_delay_seconds: f64,
    pub timeout_seconds: u64,
    pub lock_file: Option<PathBuf>,
    pub lock_mode: LockMode,
    pub require_token: bool,
    pub dry_run: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            github_token: None,
            dest: default_dest(),
            use_https: false,
            sync_only: false,
            auto_stash: false,
            auto_prune: true,
            auto_cleanup: false,
            force: false,
            skip_archived: false,
            skip_forks: false,
            max_concurrent_operations: 5,
            retry_attempts: 2,
            retry_delay_seconds: 1.0,
            timeout_seconds: 300,
            lock_file: None,
            lock_mode: LockMode::Exclusive,
            require_token: true,
            dry_run: false,
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("owner", &self.owner)
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("dest", &self.dest)
            .field("use_https", &self.use_https)
            .field("sync_only", &self.sync_only)
            .field("auto_stash", &self.auto_stash)
            .field("auto_prune", &self.auto_prune)
            .field("auto_cleanup", &self.auto_cleanup)
            .field("force", &self.force)
            .field("skip_archived", &self.skip_archived)
            .field("skip_forks", &self.skip_forks)
            .field("max_concurrent_operations", &self.max_concurrent_operations)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay_seconds", &self.retry_delay_seconds)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("lock_file", &self.lock_file)
            .field("lock_mode", &self.lock_mode)
            .field("require_token", &self.require_token)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl SyncConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    /// Defaults, then the first config file found, then the environment.
    pub fn discover(explicit: Option<&Path>, cwd: &Path) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let source = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => LOCAL_CONFIG_FILES
                .iter()
                .map(|name| cwd.join(name))
                .chain(default_config_path().ok())
                .find(|candidate| candidate.exists()),
        };
        let mut config = match source.as_deref() {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok((config, source))
    }

    /// Fills unset values from the environment and applies overrides.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if self.owner.trim().is_empty()
            && let Some(owner) = non_blank("GITHUB_USER")
        {
            self.owner = owner;
        }
        if self.token().is_none()
            && let Some(token) = non_blank("GITHUB_TOKEN")
        {
            self.github_token = Some(token);
        }
        if let Some(dest) = non_blank("REPOSYNC_DEST") {
            self.dest = PathBuf::from(dest);
        }
        if let Some(mode) = non_blank("REPOSYNC_LOCK_MODE").and_then(|value| LockMode::parse(&value))
        {
            self.lock_mode = mode;
        }
    }

    /// The token, if set and not blank.
    pub fn token(&self) -> Option<&str> {
        self.github_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner.trim().is_empty() {
            return Err(ConfigError::MissingOwner);
        }
        if self.dest.as_os_str().is_empty() || self.dest.to_string_lossy().trim().is_empty() {
            return Err(ConfigError::MissingDestination);
        }
        if self.require_token && self.token().is_none() {
            return Err(ConfigError::MissingToken);
        }
        if !(1..=MAX_CONCURRENT_OPERATIONS).contains(&self.max_concurrent_operations) {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_operations",
                reason: format!(
                    "expected 1..={MAX_CONCURRENT_OPERATIONS}, got {}",
                    self.max_concurrent_operations
                ),
            });
        }
        if !(0.0..=MAX_DURATION_SECONDS as f64).contains(&self.retry_delay_seconds) {
            return Err(ConfigError::InvalidValue {
                field: "retry_delay_seconds",
                reason: format!(
                    "expected 0..={MAX_DURATION_SECONDS}, got {}",
                    self.retry_delay_seconds
                ),
            });
        }
        if !(1..=MAX_DURATION_SECONDS).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidValue {
                field: "timeout_seconds",
                reason: format!(
                    "expected 1..={MAX_DURATION_SECONDS}, got {}",
                    self.timeout_seconds
                ),
            });
        }
        Ok(())
    }

    /// Clamped to `0..=MAX_DURATION_SECONDS`; NaN maps to zero.
    pub fn retry_delay(&self) -> Duration {
        let seconds = self
            .retry_delay_seconds
            .clamp(0.0, MAX_DURATION_SECONDS as f64);
        Duration::try_from_secs_f64(seconds).unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.min(MAX_DURATION_SECONDS))
    }

    pub fn lock_path(&self) -> anyhow::Result<PathBuf> {
        match &self.lock_file {
            Some(path) => Ok(path.clone()),
            None => default_lock_path(),
        }
    }
}

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from("com", "reposync", "reposync").context("resolve project dirs")
}

fn default_dest() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join("workspace"))
        .unwrap_or_else(|| PathBuf::from("workspace"))
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.json"))
}

pub fn default_lock_path() -> anyhow::Result<PathBuf> {
    let project = project_dirs()?;
    Ok(project
        .runtime_dir()
        .unwrap_or(project.cache_dir())
        .join("reposync.lock"))
}
