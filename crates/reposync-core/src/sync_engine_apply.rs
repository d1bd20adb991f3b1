use crate::cancel::CancelToken;
use crate::git::{GitClient, GitError, PullOutcome};
use crate::model::{ProcessResult, RepositoryDescriptor};
use crate::observer::{SyncEvent, SyncObserver};
use crate::paths::repo_destination;
use crate::retry::{RetryError, RetryPolicy};
use crate::sync_engine_types::{Interrupted, RepoOptions, SyncAction};
use crate::sync_engine_work_items::plan_action;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Drives one repository through validate, plan and execute.
pub(crate) struct RepoRunner<'a> {
    pub(crate) git: &'a dyn GitClient,
    pub(crate) observer: &'a dyn SyncObserver,
    pub(crate) retry: &'a RetryPolicy,
    pub(crate) cancel: &'a CancelToken,
    pub(crate) dest: &'a Path,
    pub(crate) options: RepoOptions,
}

impl RepoRunner<'_> {
    pub(crate) fn process(
        &self,
        index: usize,
        repo: &RepositoryDescriptor,
    ) -> Result<ProcessResult, Interrupted> {
        let started = Instant::now();
        let result = self.process_inner(index, repo)?;
        Ok(result.with_duration(started.elapsed().as_secs_f64()))
    }

    fn process_inner(
        &self,
        index: usize,
        repo: &RepositoryDescriptor,
    ) -> Result<ProcessResult, Interrupted> {
        if let Err(reason) = repo.validate() {
            return Ok(ProcessResult::failed(
                display_name(repo),
                "invalid repository descriptor",
                reason,
            ));
        }
        let path = match repo_destination(self.dest, &repo.name) {
            Ok(path) => path,
            Err(reason) => {
                return Ok(ProcessResult::failed(
                    &repo.name,
                    "invalid destination",
                    reason,
                ));
            }
        };
        let action = plan_action(self.git, &path, self.options.sync_only);
        self.observer.on_event(&SyncEvent::RepoStarted {
            index,
            repo: &repo.name,
            action,
            path: &path,
        });
        match action {
            SyncAction::Skip => Ok(ProcessResult::skipped(
                &repo.name,
                "sync-only mode: not cloned locally",
            )),
            SyncAction::Clone => self.clone_repo(repo, &path),
            SyncAction::Pull => self.pull_repo(repo, &path),
        }
    }

    fn clone_repo(
        &self,
        repo: &RepositoryDescriptor,
        path: &Path,
    ) -> Result<ProcessResult, Interrupted> {
        let url = repo.clone_url_for(self.options.use_https);
        if self.options.dry_run {
            return Ok(ProcessResult::success(
                &repo.name,
                format!("dry run: would clone {url} into {}", path.display()),
            ));
        }
        if self.options.force && path.exists() {
            debug!(repo = %repo.name, path = %path.display(), "removing existing directory before clone");
            if let Err(err) = fs::remove_dir_all(path) {
                return Ok(ProcessResult::failed(
                    &repo.name,
                    "failed to clear existing directory",
                    err.to_string(),
                ));
            }
        }
        let existed = path.exists();
        let branch = Some(repo.default_branch.as_str()).filter(|branch| !branch.is_empty());
        let outcome = self.retry.run(
            self.cancel,
            |_attempt| {
                let result = self.git.clone_repo(url, path, branch);
                if result.is_err() && !existed {
                    remove_partial_clone(path);
                }
                result
            },
            |attempt, delay, err| self.report_retry(repo, attempt, delay, err),
        );
        match outcome {
            Ok(()) => Ok(ProcessResult::success(
                &repo.name,
                format!("cloned into {}", path.display()),
            )),
            Err(err) => self.retry_failure(repo, "clone failed", err),
        }
    }

    fn pull_repo(
        &self,
        repo: &RepositoryDescriptor,
        path: &Path,
    ) -> Result<ProcessResult, Interrupted> {
        if self.options.dry_run {
            return Ok(ProcessResult::success(
                &repo.name,
                format!("dry run: would pull {}", path.display()),
            ));
        }
        let mut fetched = false;
        if self.options.auto_prune {
            match self.git.fetch_and_prune(path) {
                Ok(()) => fetched = true,
                Err(err) if err.is_interrupted() => return Err(Interrupted),
                Err(err) => {
                    warn!(repo = %repo.name, error = %err, "fetch with prune failed; continuing with pull")
                }
            }
        }

        let dirty = match self.git.has_changes(path) {
            Ok(dirty) => dirty,
            Err(err) => return git_failure(repo, "status check failed", err),
        };
        let mut stashed = false;
        if dirty {
            if self.options.auto_stash {
                stashed = match self.git.stash(path) {
                    Ok(stashed) => stashed,
                    Err(err) => return git_failure(repo, "stash failed", err),
                };
            } else if !self.options.force {
                return Ok(ProcessResult::skipped(
                    &repo.name,
                    "working tree has local changes",
                ));
            }
        }

        let pulled = self.retry.run(
            self.cancel,
            |_attempt| {
                if fetched {
                    self.git.fast_forward(path)
                } else {
                    self.git.pull(path)
                }
            },
            |attempt, delay, err| self.report_retry(repo, attempt, delay, err),
        );
        let restored = if stashed {
            Some(self.git.stash_pop(path))
        } else {
            None
        };

        let outcome = match pulled {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Some(Err(pop_err)) = &restored {
                    warn!(repo = %repo.name, error = %pop_err, "failed to restore stashed changes");
                }
                return self.retry_failure(repo, "pull failed", err);
            }
        };
        if let Some(Err(err)) = restored {
            return git_failure(repo, "pulled but failed to restore stashed changes", err);
        }

        let mut message = match outcome {
            PullOutcome::UpToDate { branch } => format!("already up to date ({branch})"),
            PullOutcome::FastForwarded { branch } => format!("fast-forwarded {branch}"),
        };
        if stashed {
            message.push_str("; local changes restored");
        }
        if self.options.auto_cleanup {
            let deleted = self.cleanup_merged_branches(repo, path)?;
            if deleted > 0 {
                message.push_str(&format!("; deleted {deleted} merged branches"));
            }
        }
        Ok(ProcessResult::success(&repo.name, message))
    }

    fn cleanup_merged_branches(
        &self,
        repo: &RepositoryDescriptor,
        path: &Path,
    ) -> Result<usize, Interrupted> {
        let merged = match self.git.merged_branches(path, &repo.default_branch) {
            Ok(merged) => merged,
            Err(err) if err.is_interrupted() => return Err(Interrupted),
            Err(err) => {
                warn!(repo = %repo.name, error = %err, "listing merged branches failed");
                return Ok(0);
            }
        };
        let mut deleted = 0;
        for branch in merged {
            match self.git.delete_branch(path, &branch) {
                Ok(()) => {
                    debug!(repo = %repo.name, branch = %branch, "deleted merged branch");
                    deleted += 1;
                }
                Err(err) if err.is_interrupted() => return Err(Interrupted),
                Err(err) => {
                    warn!(repo = %repo.name, branch = %branch, error = %err, "delete branch failed")
                }
            }
        }
        Ok(deleted)
    }

    fn report_retry(&self, repo: &RepositoryDescriptor, attempt: u32, delay: Duration, err: &GitError) {
        let error = err.to_string();
        self.observer.on_event(&SyncEvent::RepoRetrying {
            repo: &repo.name,
            attempt,
            delay,
            error: &error,
        });
    }

    fn retry_failure(
        &self,
        repo: &RepositoryDescriptor,
        message: &str,
        err: RetryError<GitError>,
    ) -> Result<ProcessResult, Interrupted> {
        match err {
            RetryError::Interrupted => Err(Interrupted),
            RetryError::Fatal { error, .. } => git_failure(repo, message, error),
            RetryError::Exhausted { attempts, last } => Ok(ProcessResult::failed(
                &repo.name,
                format!("{message} after {attempts} attempts"),
                last.to_string(),
            )),
        }
    }
}

fn git_failure(
    repo: &RepositoryDescriptor,
    message: &str,
    err: GitError,
) -> Result<ProcessResult, Interrupted> {
    if err.is_interrupted() {
        return Err(Interrupted);
    }
    Ok(ProcessResult::failed(&repo.name, message, err.to_string()))
}

fn display_name(repo: &RepositoryDescriptor) -> &str {
    if repo.name.trim().is_empty() {
        "<unnamed>"
    } else {
        &repo.name
    }
}

fn remove_partial_clone(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path)
        && err.kind() != ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %err, "failed to remove partial clone");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitErrorKind;
    use crate::model::ResultStatus;
    use crate::observer::NoopObserver;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records calls; `.git` directories stand in for repositories.
    #[derive(Default)]
    struct ScriptedGit {
        calls: Mutex<Vec<String>>,
        dirty: bool,
        fetch_error: Option<GitErrorKind>,
        pull_error: Option<GitErrorKind>,
        merged: Vec<String>,
    }

    impl ScriptedGit {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn outcome(&self) -> Result<PullOutcome, GitError> {
            match self.pull_error {
                Some(kind) => Err(GitError::new(kind, "pull broke")),
                None => Ok(PullOutcome::FastForwarded {
                    branch: "main".to_string(),
                }),
            }
        }
    }

    impl GitClient for ScriptedGit {
        fn is_repository(&self, dir: &Path) -> bool {
            dir.join(".git").is_dir()
        }

        fn clone_repo(&self, url: &str, dest: &Path, _branch: Option<&str>) -> Result<(), GitError> {
            self.record(format!("clone {url}"));
            fs::create_dir_all(dest.join(".git"))?;
            Ok(())
        }

        fn fetch_and_prune(&self, _dir: &Path) -> Result<(), GitError> {
            self.record("fetch");
            match self.fetch_error {
                Some(kind) => Err(GitError::new(kind, "fetch broke")),
                None => Ok(()),
            }
        }

        fn pull(&self, _dir: &Path) -> Result<PullOutcome, GitError> {
            self.record("pull");
            self.outcome()
        }

        fn fast_forward(&self, _dir: &Path) -> Result<PullOutcome, GitError> {
            self.record("fast_forward");
            self.outcome()
        }

        fn has_changes(&self, _dir: &Path) -> Result<bool, GitError> {
            Ok(self.dirty)
        }

        fn stash(&self, _dir: &Path) -> Result<bool, GitError> {
            self.record("stash");
            Ok(true)
        }

        fn stash_pop(&self, _dir: &Path) -> Result<(), GitError> {
            self.record("stash_pop");
            Ok(())
        }

        fn current_branch(&self, _dir: &Path) -> Result<Option<String>, GitError> {
            Ok(Some("main".to_string()))
        }

        fn merged_branches(&self, _dir: &Path, _base: &str) -> Result<Vec<String>, GitError> {
            Ok(self.merged.clone())
        }

        fn delete_branch(&self, _dir: &Path, branch: &str) -> Result<(), GitError> {
            self.record(format!("delete {branch}"));
            Ok(())
        }
    }

    fn repo(name: &str) -> RepositoryDescriptor {
        RepositoryDescriptor::new(
            name,
            format!("https://github.com/octo/{name}.git"),
            format!("git@github.com:octo/{name}.git"),
        )
    }

    fn run(
        git: &ScriptedGit,
        dest: &Path,
        options: RepoOptions,
        repo: &RepositoryDescriptor,
    ) -> Result<ProcessResult, Interrupted> {
        let retry = RetryPolicy::new(0, Duration::ZERO);
        let cancel = CancelToken::new();
        let runner = RepoRunner {
            git,
            observer: &NoopObserver,
            retry: &retry,
            cancel: &cancel,
            dest,
            options,
        };
        runner.process(0, repo)
    }

    fn existing_checkout(tmp: &TempDir, name: &str) {
        fs::create_dir_all(tmp.path().join(name).join(".git")).unwrap();
    }

    #[test]
    fn clones_missing_repo_with_ssh_url_by_default() {
        let tmp = TempDir::new().unwrap();
        let git = ScriptedGit::default();
        let result = run(&git, tmp.path(), RepoOptions::default(), &repo("tool")).unwrap();
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(git.calls(), vec!["clone git@github.com:octo/tool.git"]);
    }

    #[test]
    fn dirty_tree_without_stash_is_skipped() {
        let tmp = TempDir::new().unwrap();
        existing_checkout(&tmp, "tool");
        let git = ScriptedGit {
            dirty: true,
            ..ScriptedGit::default()
        };
        let options = RepoOptions {
            auto_prune: true,
            ..RepoOptions::default()
        };
        let result = run(&git, tmp.path(), options, &repo("tool")).unwrap();
        assert_eq!(result.status, ResultStatus::Skipped);
        assert_eq!(result.message, "working tree has local changes");
        assert_eq!(git.calls(), vec!["fetch"]);
    }

    #[test]
    fn successful_prune_fetch_is_not_repeated() {
        let tmp = TempDir::new().unwrap();
        existing_checkout(&tmp, "tool");
        let git = ScriptedGit::default();
        let options = RepoOptions {
            auto_prune: true,
            ..RepoOptions::default()
        };
        let result = run(&git, tmp.path(), options, &repo("tool")).unwrap();
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(git.calls(), vec!["fetch", "fast_forward"]);

        let git = ScriptedGit {
            fetch_error: Some(GitErrorKind::Network),
            ..ScriptedGit::default()
        };
        let result = run(&git, tmp.path(), options, &repo("tool")).unwrap();
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(git.calls(), vec!["fetch", "pull"]);
    }

    #[test]
    fn auto_stash_wraps_pull_and_pops_even_on_failure() {
        let tmp = TempDir::new().unwrap();
        existing_checkout(&tmp, "tool");
        let git = ScriptedGit {
            dirty: true,
            pull_error: Some(GitErrorKind::Conflict),
            ..ScriptedGit::default()
        };
        let options = RepoOptions {
            auto_stash: true,
            ..RepoOptions::default()
        };
        let result = run(&git, tmp.path(), options, &repo("tool")).unwrap();
        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("pull broke"));
        assert_eq!(git.calls(), vec!["stash", "pull", "stash_pop"]);
    }

    #[test]
    fn cleanup_deletes_merged_branches_after_pull() {
        let tmp = TempDir::new().unwrap();
        existing_checkout(&tmp, "tool");
        let git = ScriptedGit {
            merged: vec!["done".to_string()],
            ..ScriptedGit::default()
        };
        let options = RepoOptions {
            auto_cleanup: true,
            ..RepoOptions::default()
        };
        let result = run(&git, tmp.path(), options, &repo("tool")).unwrap();
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.message, "fast-forwarded main; deleted 1 merged branches");
        assert_eq!(git.calls(), vec!["pull", "delete done"]);
    }

    #[test]
    fn force_replaces_non_repository_directory() {
        let tmp = TempDir::new().unwrap();
        let stray = tmp.path().join("tool");
        fs::create_dir_all(&stray).unwrap();
        fs::write(stray.join("junk.txt"), "x").unwrap();
        let git = ScriptedGit::default();
        let options = RepoOptions {
            force: true,
            use_https: true,
            ..RepoOptions::default()
        };
        let result = run(&git, tmp.path(), options, &repo("tool")).unwrap();
        assert_eq!(result.status, ResultStatus::Success);
        assert!(!stray.join("junk.txt").exists());
        assert_eq!(git.calls(), vec!["clone https://github.com/octo/tool.git"]);
    }

    #[test]
    fn interrupted_pull_propagates() {
        let tmp = TempDir::new().unwrap();
        existing_checkout(&tmp, "tool");
        let git = ScriptedGit {
            pull_error: Some(GitErrorKind::Interrupted),
            ..ScriptedGit::default()
        };
        assert_eq!(
            run(&git, tmp.path(), RepoOptions::default(), &repo("tool")),
            Err(Interrupted)
        );
    }

    #[test]
    fn escaping_name_fails_only_that_repo() {
        let tmp = TempDir::new().unwrap();
        let git = ScriptedGit::default();
        let result = run(&git, tmp.path(), RepoOptions::default(), &repo("..")).unwrap();
        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(result.message, "invalid destination");
        assert!(git.calls().is_empty());
    }
}
