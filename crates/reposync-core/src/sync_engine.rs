use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::git::GitClient;
use crate::lockfile::{LockMode, ProcessLock};
use crate::observer::{SyncEvent, SyncObserver, TracingObserver};
use crate::provider::RepoSource;
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use crate::summary::SyncSummary;
use crate::sync_engine_apply::RepoRunner;
use crate::sync_engine_types::{Interrupted, RepoOptions};
use crate::sync_engine_work_items::filter_repositories;
use crate::sync_engine_workers::run_work_items;
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors that abort a run instead of producing a summary.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    #[error("sync interrupted")]
    Interrupted,
}

/// Syncs every repository of one owner into a local destination.
pub struct SyncOrchestrator<'a> {
    source: &'a dyn RepoSource,
    git: &'a dyn GitClient,
    observer: Arc<dyn SyncObserver>,
    cancel: CancelToken,
    sleeper: Arc<dyn Sleeper>,
    lock_mode: Option<LockMode>,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(source: &'a dyn RepoSource, git: &'a dyn GitClient) -> Self {
        Self {
            source,
            git,
            observer: Arc::new(TracingObserver),
            cancel: CancelToken::new(),
            sleeper: Arc::new(ThreadSleeper),
            lock_mode: None,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Overrides the lock mode from the configuration.
    #[must_use]
    pub fn with_lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = Some(mode);
        self
    }

    /// Runs one sync. Configuration, lock and listing problems come back as a
    /// failed summary; only an interrupt is an `Err`.
    pub fn run(&self, config: &SyncConfig, dry_run: bool) -> Result<SyncSummary, SyncError> {
        let started = Instant::now();
        let dry_run = dry_run || config.dry_run;
        let summary = self.run_inner(config, dry_run, started)?;
        self.observer
            .on_event(&SyncEvent::RunFinished { summary: &summary });
        Ok(summary)
    }

    fn run_inner(
        &self,
        config: &SyncConfig,
        dry_run: bool,
        started: Instant,
    ) -> Result<SyncSummary, SyncError> {
        let fatal = |message: String| -> Result<SyncSummary, SyncError> {
            error!("{message}");
            Ok(SyncSummary::fatal(
                message,
                started.elapsed().as_secs_f64(),
            ))
        };

        if let Err(err) = config.validate() {
            return fatal(format!("invalid configuration: {err}"));
        }

        let mut lock = if dry_run {
            ProcessLock::disabled()
        } else {
            let path = match config.lock_path() {
                Ok(path) => path,
                Err(err) => return fatal(format!("failed to resolve lock path: {err:#}")),
            };
            ProcessLock::new(path, self.lock_mode.unwrap_or(config.lock_mode))
        };
        if !lock.acquire() {
            return fatal(format!(
                "another sync is already running (lock: {})",
                lock.path().display()
            ));
        }
        if self.cancel.is_cancelled() {
            return Err(SyncError::Interrupted);
        }

        let repos = match self
            .source
            .list_repositories(&config.owner, config.token())
        {
            Ok(repos) => repos,
            Err(err) => {
                return fatal(format!(
                    "failed to list repositories for {}: {err}",
                    config.owner
                ));
            }
        };
        if repos.is_empty() {
            return fatal(format!("no repositories found for owner '{}'", config.owner));
        }
        info!(owner = %config.owner, count = repos.len(), "listed repositories");

        if !dry_run
            && let Err(err) = fs::create_dir_all(&config.dest)
        {
            return fatal(format!(
                "failed to create destination {}: {err}",
                config.dest.display()
            ));
        }

        let total = repos.len();
        let repos = filter_repositories(repos, config);
        if repos.len() < total {
            info!(filtered = total - repos.len(), "excluded repositories by filter");
        }
        self.observer.on_event(&SyncEvent::RunStarted {
            owner: &config.owner,
            total: repos.len(),
            dry_run,
        });

        let retry = RetryPolicy::new(config.retry_attempts, config.retry_delay())
            .with_sleeper(Arc::clone(&self.sleeper));
        let runner = RepoRunner {
            git: self.git,
            observer: self.observer.as_ref(),
            retry: &retry,
            cancel: &self.cancel,
            dest: &config.dest,
            options: RepoOptions {
                use_https: config.use_https,
                sync_only: config.sync_only,
                auto_stash: config.auto_stash,
                auto_prune: config.auto_prune,
                auto_cleanup: config.auto_cleanup,
                force: config.force,
                dry_run,
            },
        };
        let results = match run_work_items(&runner, &repos, config.max_concurrent_operations) {
            Ok(results) => results,
            Err(Interrupted) => {
                warn!("sync interrupted; stopping");
                return Err(SyncError::Interrupted);
            }
        };
        lock.release();
        Ok(SyncSummary::from_results(
            results,
            started.elapsed().as_secs_f64(),
        ))
    }
}

/// Runs a sync with the default observer and a fresh cancel token.
pub fn sync_repositories(
    config: &SyncConfig,
    dry_run: bool,
    source: &dyn RepoSource,
    git: &dyn GitClient,
) -> Result<SyncSummary, SyncError> {
    SyncOrchestrator::new(source, git).run(config, dry_run)
}
