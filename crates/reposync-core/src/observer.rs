use crate::model::{ProcessResult, ResultStatus};
use crate::summary::SyncSummary;
use crate::sync_engine_types::SyncAction;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Progress notifications emitted during a run.
///
/// `RepoStarted` and `RepoRetrying` arrive from worker threads; the other
/// events are emitted by the coordinating thread.
#[derive(Debug)]
pub enum SyncEvent<'a> {
    RunStarted {
        owner: &'a str,
        total: usize,
        dry_run: bool,
    },
    RepoStarted {
        index: usize,
        repo: &'a str,
        action: SyncAction,
        path: &'a Path,
    },
    RepoRetrying {
        repo: &'a str,
        attempt: u32,
        delay: Duration,
        error: &'a str,
    },
    RepoFinished {
        index: usize,
        result: &'a ProcessResult,
    },
    RunFinished {
        summary: &'a SyncSummary,
    },
}

pub trait SyncObserver: Send + Sync {
    fn on_event(&self, event: &SyncEvent<'_>);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {
    fn on_event(&self, _event: &SyncEvent<'_>) {}
}

/// Reports every event as a structured `tracing` record.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_event(&self, event: &SyncEvent<'_>) {
        match event {
            SyncEvent::RunStarted {
                owner,
                total,
                dry_run,
            } => info!(owner = %owner, total, dry_run, "sync started"),
            SyncEvent::RepoStarted {
                repo, action, path, ..
            } => debug!(
                repo = %repo,
                action = action.as_str(),
                path = %path.display(),
                "processing repo"
            ),
            SyncEvent::RepoRetrying {
                repo,
                attempt,
                delay,
                error,
            } => warn!(
                repo = %repo,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient failure; retrying"
            ),
            SyncEvent::RepoFinished { result, .. } => match result.status {
                ResultStatus::Success => info!(
                    repo = %result.repo_name,
                    duration_s = result.duration_seconds,
                    "{}",
                    result.message
                ),
                ResultStatus::Skipped => info!(repo = %result.repo_name, "skipped: {}", result.message),
                ResultStatus::Failed => error!(
                    repo = %result.repo_name,
                    error = result.error.as_deref().unwrap_or(""),
                    "{}",
                    result.message
                ),
            },
            SyncEvent::RunFinished { summary } => {
                if summary.success {
                    info!(
                        total = summary.total,
                        succeeded = summary.success_count,
                        skipped = summary.skipped_count,
                        duration_s = summary.duration_seconds,
                        "sync finished"
                    );
                } else {
                    warn!(
                        total = summary.total,
                        failed = summary.failed_count,
                        errors = summary.errors.len(),
                        "sync finished with errors"
                    );
                }
            }
        }
    }
}
