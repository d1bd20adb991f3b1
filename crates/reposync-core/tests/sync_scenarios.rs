use reposync_core::cancel::CancelToken;
use reposync_core::config::SyncConfig;
use reposync_core::git::{GitClient, GitError, GitErrorKind, PullOutcome};
use reposync_core::lockfile::{LockMode, ProcessLock};
use reposync_core::model::{RepositoryDescriptor, ResultStatus};
use reposync_core::observer::{SyncEvent, SyncObserver};
use reposync_core::provider::{RepoSource, SourceError, SourceErrorKind};
use reposync_core::retry::Sleeper;
use reposync_core::summary::SyncSummary;
use reposync_core::sync_engine::{SyncError, SyncOrchestrator, sync_repositories};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Git double: clones create a `.git` directory, failures are scripted per
/// repository name and every mutating call is recorded.
#[derive(Default)]
struct FakeGit {
    calls: Mutex<Vec<String>>,
    clone_failures: Mutex<HashMap<String, VecDeque<GitError>>>,
    cancel_on_clone: Option<CancelToken>,
    panic_on_clone: Option<String>,
}

impl FakeGit {
    fn fail_clone(self, name: &str, errors: Vec<GitError>) -> Self {
        self.clone_failures
            .lock()
            .unwrap()
            .insert(name.to_string(), errors.into());
        self
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.as_str() == prefix)
            .count()
    }
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl GitClient for FakeGit {
    fn is_repository(&self, dir: &Path) -> bool {
        dir.join(".git").is_dir()
    }

    fn clone_repo(&self, _url: &str, dest: &Path, _branch: Option<&str>) -> Result<(), GitError> {
        let name = dir_name(dest);
        self.record(format!("clone {name}"));
        if self.panic_on_clone.as_deref() == Some(name.as_str()) {
            panic!("clone of {name} blew up");
        }
        if let Some(cancel) = &self.cancel_on_clone {
            cancel.cancel();
            return Err(GitError::interrupted());
        }
        let scripted = self
            .clone_failures
            .lock()
            .unwrap()
            .get_mut(&name)
            .and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            fs::create_dir_all(dest)?;
            return Err(err);
        }
        fs::create_dir_all(dest.join(".git"))?;
        Ok(())
    }

    fn fetch_and_prune(&self, dir: &Path) -> Result<(), GitError> {
        self.record(format!("fetch {}", dir_name(dir)));
        Ok(())
    }

    fn pull(&self, dir: &Path) -> Result<PullOutcome, GitError> {
        self.record(format!("pull {}", dir_name(dir)));
        Ok(PullOutcome::UpToDate {
            branch: "main".to_string(),
        })
    }

    fn fast_forward(&self, dir: &Path) -> Result<PullOutcome, GitError> {
        self.record(format!("fast_forward {}", dir_name(dir)));
        Ok(PullOutcome::UpToDate {
            branch: "main".to_string(),
        })
    }

    fn has_changes(&self, _dir: &Path) -> Result<bool, GitError> {
        Ok(false)
    }

    fn stash(&self, dir: &Path) -> Result<bool, GitError> {
        self.record(format!("stash {}", dir_name(dir)));
        Ok(false)
    }

    fn stash_pop(&self, dir: &Path) -> Result<(), GitError> {
        self.record(format!("stash_pop {}", dir_name(dir)));
        Ok(())
    }

    fn current_branch(&self, _dir: &Path) -> Result<Option<String>, GitError> {
        Ok(Some("main".to_string()))
    }

    fn merged_branches(&self, _dir: &Path, _base: &str) -> Result<Vec<String>, GitError> {
        Ok(Vec::new())
    }

    fn delete_branch(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        self.record(format!("delete {} {branch}", dir_name(dir)));
        Ok(())
    }
}

#[derive(Default)]
struct FakeSource {
    repos: Vec<RepositoryDescriptor>,
    error: Option<SourceError>,
    calls: AtomicUsize,
}

impl FakeSource {
    fn with_names(names: &[&str]) -> Self {
        Self {
            repos: names.iter().map(|name| repo(name)).collect(),
            ..Self::default()
        }
    }
}

impl RepoSource for FakeSource {
    fn list_repositories(
        &self,
        _owner: &str,
        _token: Option<&str>,
    ) -> Result<Vec<RepositoryDescriptor>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(self.repos.clone()),
        }
    }
}

#[derive(Default)]
struct NoSleep {
    delays: Mutex<Vec<Duration>>,
}

impl Sleeper for NoSleep {
    fn sleep(&self, delay: Duration, _cancel: &CancelToken) -> bool {
        self.delays.lock().unwrap().push(delay);
        true
    }
}

#[derive(Default)]
struct RecordingObserver {
    finished: Mutex<Vec<usize>>,
    retries: AtomicUsize,
}

impl SyncObserver for RecordingObserver {
    fn on_event(&self, event: &SyncEvent<'_>) {
        match event {
            SyncEvent::RepoFinished { index, .. } => self.finished.lock().unwrap().push(*index),
            SyncEvent::RepoRetrying { .. } => {
                self.retries.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

fn repo(name: &str) -> RepositoryDescriptor {
    RepositoryDescriptor::new(
        name,
        format!("https://github.com/octo/{name}.git"),
        format!("git@github.com:octo/{name}.git"),
    )
}

fn config(tmp: &TempDir) -> SyncConfig {
    SyncConfig {
        owner: "octo".to_string(),
        github_token: Some("test-token".to_string()),
        dest: tmp.path().join("ws"),
        lock_file: Some(tmp.path().join("reposync.lock")),
        retry_delay_seconds: 0.0,
        ..SyncConfig::default()
    }
}

fn run(source: &FakeSource, git: &FakeGit, config: &SyncConfig) -> SyncSummary {
    SyncOrchestrator::new(source, git)
        .with_sleeper(Arc::new(NoSleep::default()))
        .run(config, false)
        .unwrap()
}

fn assert_counts_consistent(summary: &SyncSummary) {
    assert_eq!(summary.total, summary.results.len());
    assert_eq!(
        summary.total,
        summary.success_count + summary.failed_count + summary.skipped_count
    );
}

#[test]
fn clones_every_missing_repository() {
    let tmp = TempDir::new().unwrap();
    let source = FakeSource::with_names(&["a", "b", "c"]);
    let git = FakeGit::default();
    let summary = run(&source, &git, &config(&tmp));

    assert_eq!(summary.total, 3);
    assert_eq!(summary.success_count, 3);
    assert_eq!(summary.failed_count, 0);
    assert_eq!(summary.skipped_count, 0);
    assert!(summary.success);
    assert_counts_consistent(&summary);
    for name in ["a", "b", "c"] {
        assert!(tmp.path().join("ws").join(name).join(".git").is_dir());
    }
    assert!(!tmp.path().join("reposync.lock").exists());
}

#[test]
fn one_failing_repository_does_not_stop_the_others() {
    let tmp = TempDir::new().unwrap();
    let source = FakeSource::with_names(&["a", "b", "c"]);
    let git =
        FakeGit::default().fail_clone("b", vec![GitError::new(GitErrorKind::Io, "disk full")]);
    let summary = run(&source, &git, &config(&tmp));

    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.failed_count, 1);
    assert!(!summary.success);
    let names: Vec<_> = summary
        .results
        .iter()
        .filter(|result| result.is_success())
        .map(|result| result.repo_name.as_str())
        .collect();
    assert_eq!(names, vec!["a", "c"]);
    assert_eq!(summary.errors, vec!["b: disk full".to_string()]);
    assert_eq!(summary.results[1].status, ResultStatus::Failed);
    assert!(!tmp.path().join("ws").join("b").exists());
    assert_eq!(git.calls_for("clone b"), 1);
}

#[test]
fn empty_repository_list_is_a_failed_run() {
    let tmp = TempDir::new().unwrap();
    let source = FakeSource::default();
    let git = FakeGit::default();
    let summary = run(&source, &git, &config(&tmp));

    assert_eq!(summary.total, 0);
    assert!(!summary.success);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("no repositories found"));
    assert!(git.calls().is_empty());
}

#[test]
fn missing_token_stops_before_any_work() {
    let tmp = TempDir::new().unwrap();
    let source = FakeSource::with_names(&["a"]);
    let git = FakeGit::default();
    let mut config = config(&tmp);
    config.github_token = Some(String::new());
    let summary = run(&source, &git, &config);

    assert!(!summary.success);
    assert!(summary.errors[0].contains("token"));
    assert!(git.calls().is_empty());
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    assert!(!tmp.path().join("ws").exists());
}

#[test]
fn thousand_repositories_keep_input_order() {
    let tmp = TempDir::new().unwrap();
    let names: Vec<String> = (0..1000).map(|index| format!("repo-{index:04}")).collect();
    let source = FakeSource {
        repos: names.iter().map(|name| repo(name)).collect(),
        ..FakeSource::default()
    };
    let git = FakeGit::default();
    let observer = Arc::new(RecordingObserver::default());
    let mut config = config(&tmp);
    config.max_concurrent_operations = 10;

    let summary = SyncOrchestrator::new(&source, &git)
        .with_observer(observer.clone())
        .run(&config, false)
        .unwrap();

    assert_eq!(summary.total, 1000);
    assert_eq!(summary.success_count, 1000);
    assert_counts_consistent(&summary);
    let result_names: Vec<_> = summary
        .results
        .iter()
        .map(|result| result.repo_name.clone())
        .collect();
    assert_eq!(result_names, names);
    let mut finished = observer.finished.lock().unwrap().clone();
    finished.sort_unstable();
    assert_eq!(finished, (0..1000).collect::<Vec<_>>());
}

#[test]
fn transient_timeouts_are_retried_to_success() {
    let tmp = TempDir::new().unwrap();
    let source = FakeSource::with_names(&["flaky"]);
    let git = FakeGit::default().fail_clone(
        "flaky",
        vec![
            GitError::new(GitErrorKind::Timeout, "timed out"),
            GitError::new(GitErrorKind::Timeout, "timed out"),
        ],
    );
    let sleeper = Arc::new(NoSleep::default());
    let observer = Arc::new(RecordingObserver::default());
    let mut config = config(&tmp);
    config.retry_attempts = 2;
    config.retry_delay_seconds = 1.0;

    let summary = SyncOrchestrator::new(&source, &git)
        .with_sleeper(sleeper.clone())
        .with_observer(observer.clone())
        .run(&config, false)
        .unwrap();

    assert_eq!(summary.results[0].status, ResultStatus::Success);
    assert!(summary.success);
    assert_eq!(git.calls_for("clone flaky"), 3);
    assert_eq!(observer.retries.load(Ordering::SeqCst), 2);
    assert_eq!(
        *sleeper.delays.lock().unwrap(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[test]
fn exhausted_retries_fail_the_repository() {
    let tmp = TempDir::new().unwrap();
    let source = FakeSource::with_names(&["down"]);
    let errors = (0..3)
        .map(|_| GitError::new(GitErrorKind::Network, "connection reset"))
        .collect();
    let git = FakeGit::default().fail_clone("down", errors);
    let summary = run(&source, &git, &config(&tmp));

    let result = &summary.results[0];
    assert_eq!(result.status, ResultStatus::Failed);
    assert_eq!(result.message, "clone failed after 3 attempts");
    assert_eq!(git.calls_for("clone down"), 3);
    assert!(!tmp.path().join("ws").join("down").exists());
}

#[test]
fn sync_only_skips_missing_and_pulls_existing() {
    let tmp = TempDir::new().unwrap();
    let config = SyncConfig {
        sync_only: true,
        ..config(&tmp)
    };
    fs::create_dir_all(config.dest.join("present").join(".git")).unwrap();
    let source = FakeSource::with_names(&["present", "absent"]);
    let git = FakeGit::default();
    let summary = run(&source, &git, &config);

    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.skipped_count, 1);
    assert!(summary.success);
    assert_eq!(summary.results[1].status, ResultStatus::Skipped);
    assert_eq!(git.calls(), vec!["fetch present", "fast_forward present"]);
}

#[test]
fn dry_run_touches_nothing() {
    let tmp = TempDir::new().unwrap();
    let source = FakeSource::with_names(&["a", "b"]);
    let git = FakeGit::default();
    let config = config(&tmp);
    let summary = SyncOrchestrator::new(&source, &git)
        .run(&config, true)
        .unwrap();

    assert_eq!(summary.success_count, 2);
    assert!(
        summary.results[0]
            .message
            .starts_with("dry run: would clone git@github.com:octo/a.git")
    );
    assert!(git.calls().is_empty());
    assert!(!config.dest.exists());
    assert!(!tmp.path().join("reposync.lock").exists());
}

#[test]
fn interrupt_aborts_the_run() {
    let tmp = TempDir::new().unwrap();
    let source = FakeSource::with_names(&["a", "b", "c"]);
    let cancel = CancelToken::new();
    let git = FakeGit {
        cancel_on_clone: Some(cancel.clone()),
        ..FakeGit::default()
    };
    let config = SyncConfig {
        max_concurrent_operations: 1,
        ..config(&tmp)
    };
    let result = SyncOrchestrator::new(&source, &git)
        .with_cancel(cancel)
        .run(&config, false);

    assert_eq!(result, Err(SyncError::Interrupted));
    assert_eq!(git.calls(), vec!["clone a"]);
    assert!(!tmp.path().join("reposync.lock").exists());
}

#[test]
fn parallel_interrupt_aborts_the_run() {
    let tmp = TempDir::new().unwrap();
    let names: Vec<String> = (0..50).map(|index| format!("r{index}")).collect();
    let source = FakeSource {
        repos: names.iter().map(|name| repo(name)).collect(),
        ..FakeSource::default()
    };
    let cancel = CancelToken::new();
    let git = FakeGit {
        cancel_on_clone: Some(cancel.clone()),
        ..FakeGit::default()
    };
    let mut config = config(&tmp);
    config.max_concurrent_operations = 4;
    let result = SyncOrchestrator::new(&source, &git)
        .with_cancel(cancel)
        .run(&config, false);

    assert_eq!(result, Err(SyncError::Interrupted));
    assert!(git.calls().len() <= 4);
}

#[test]
fn unicode_names_are_used_verbatim() {
    let tmp = TempDir::new().unwrap();
    let source = FakeSource::with_names(&["café", "日本語-tools"]);
    let git = FakeGit::default();
    let config = config(&tmp);
    let summary = run(&source, &git, &config);

    assert!(summary.success);
    assert!(config.dest.join("café").join(".git").is_dir());
    assert!(config.dest.join("日本語-tools").join(".git").is_dir());
}

#[test]
fn malformed_descriptor_fails_only_itself() {
    let tmp = TempDir::new().unwrap();
    let mut broken = repo("broken");
    broken.ssh_url = String::new();
    let source = FakeSource {
        repos: vec![repo("good"), broken, repo("../escape")],
        ..FakeSource::default()
    };
    let git = FakeGit::default();
    let summary = run(&source, &git, &config(&tmp));

    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.failed_count, 2);
    assert_eq!(summary.results[1].error.as_deref(), Some("ssh_url is empty"));
    assert_eq!(summary.results[2].message, "invalid destination");
    assert_eq!(git.calls(), vec!["clone good"]);
}

fn assert_panic_is_contained(jobs: usize) {
    let tmp = TempDir::new().unwrap();
    let source = FakeSource::with_names(&["a", "b", "c"]);
    let git = FakeGit {
        panic_on_clone: Some("b".to_string()),
        ..FakeGit::default()
    };
    let config = SyncConfig {
        max_concurrent_operations: jobs,
        ..config(&tmp)
    };
    let summary = run(&source, &git, &config);

    assert_counts_consistent(&summary);
    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.failed_count, 1);
    assert!(!summary.success);
    let failed = &summary.results[1];
    assert_eq!(failed.repo_name, "b");
    assert_eq!(failed.status, ResultStatus::Failed);
    assert_eq!(failed.message, "internal error");
    assert_eq!(failed.error.as_deref(), Some("clone of b blew up"));
    assert!(summary.results[0].is_success());
    assert!(summary.results[2].is_success());
    assert!(!tmp.path().join("reposync.lock").exists());
}

#[test]
fn panicking_repository_fails_alone_serially() {
    assert_panic_is_contained(1);
}

#[test]
fn panicking_repository_fails_alone_in_parallel() {
    assert_panic_is_contained(2);
}

#[test]
fn unreadable_listing_entry_fails_only_itself() {
    let tmp = TempDir::new().unwrap();
    let source = FakeSource {
        repos: vec![
            repo("a"),
            RepositoryDescriptor::unreadable("<entry 2>", "repository entry has no name"),
            repo("c"),
        ],
        ..FakeSource::default()
    };
    let git = FakeGit::default();
    let summary = run(&source, &git, &config(&tmp));

    assert_counts_consistent(&summary);
    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.failed_count, 1);
    assert_eq!(summary.results[1].status, ResultStatus::Failed);
    assert_eq!(
        summary.results[1].error.as_deref(),
        Some("repository entry has no name")
    );
    let mut calls = git.calls();
    calls.sort();
    assert_eq!(calls, vec!["clone a", "clone c"]);
}

#[test]
fn held_lock_blocks_a_second_run() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    let mut holder = ProcessLock::new(config.lock_path().unwrap(), LockMode::Exclusive);
    assert!(holder.acquire());

    let source = FakeSource::with_names(&["a"]);
    let git = FakeGit::default();
    let summary = run(&source, &git, &config);
    assert!(!summary.success);
    assert!(summary.errors[0].starts_with("another sync is already running"));
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);

    let summary = SyncOrchestrator::new(&source, &git)
        .with_lock_mode(LockMode::Disabled)
        .run(&config, false)
        .unwrap();
    assert!(summary.success);
}

#[test]
fn source_failure_is_reported_in_the_summary() {
    let tmp = TempDir::new().unwrap();
    let source = FakeSource {
        error: Some(SourceError::new(SourceErrorKind::Auth, "bad credentials").with_status(401)),
        ..FakeSource::default()
    };
    let git = FakeGit::default();
    let summary = sync_repositories(&config(&tmp), false, &source, &git).unwrap();

    assert!(!summary.success);
    assert_eq!(
        summary.errors,
        vec!["failed to list repositories for octo: bad credentials".to_string()]
    );
}

#[test]
fn filters_drop_archived_repositories() {
    let tmp = TempDir::new().unwrap();
    let mut archived = repo("old");
    archived.archived = true;
    let source = FakeSource {
        repos: vec![repo("new"), archived],
        ..FakeSource::default()
    };
    let git = FakeGit::default();
    let config = SyncConfig {
        skip_archived: true,
        ..config(&tmp)
    };
    let summary = run(&source, &git, &config);
    assert_eq!(summary.total, 1);
    assert_eq!(summary.results[0].repo_name, "new");
}
