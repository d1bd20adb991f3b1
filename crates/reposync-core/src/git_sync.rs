use crate::cancel::CancelToken;
use crate::git::{GitClient, GitError, GitErrorKind, PullOutcome};
use crate::model::RepoAuth;
use git2::{
    BranchType, Cred, CredentialType, ErrorClass as Git2Class, ErrorCode, FetchOptions,
    FetchPrune, Oid, RemoteCallbacks, Repository, Signature, StashApplyOptions, StashFlags,
    StatusOptions,
    build::{CheckoutBuilder, RepoBuilder},
};
use std::cell::Cell;
use std::ffi::c_int;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// libgit2 socket timeout currently applied to the process, in milliseconds.
static SERVER_TIMEOUT_MS: Mutex<Option<c_int>> = Mutex::new(None);

#[derive(Clone, Debug)]
pub struct Git2Options {
    /// Upper bound for a single network transfer (clone or fetch).
    pub timeout: Duration,
    pub auth: Option<RepoAuth>,
    pub cancel: CancelToken,
}

impl Default for Git2Options {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            auth: None,
            cancel: CancelToken::new(),
        }
    }
}

/// [`GitClient`] backed by libgit2.
#[derive(Clone, Debug)]
pub struct Git2Client {
    options: Git2Options,
}

impl Default for Git2Client {
    fn default() -> Self {
        Self::new(Git2Options::default())
    }
}

impl Git2Client {
    /// Also bounds libgit2's socket connect and read timeouts by
    /// `options.timeout`, so a server that never answers cannot stall a
    /// transfer. Those settings are process-wide and only ever tightened.
    pub fn new(options: Git2Options) -> Self {
        apply_server_timeout(options.timeout);
        Self { options }
    }

    fn guard(&self) -> TransferGuard<'_> {
        TransferGuard {
            deadline: Instant::now().checked_add(self.options.timeout),
            timeout: self.options.timeout,
            cancel: &self.options.cancel,
            auth: self.options.auth.as_ref(),
            credential_attempts: Cell::new(0),
        }
    }
}

/// Per-transfer state shared with libgit2 callbacks.
struct TransferGuard<'a> {
    /// `None` when the timeout is past the clock's range.
    deadline: Option<Instant>,
    timeout: Duration,
    cancel: &'a CancelToken,
    auth: Option<&'a RepoAuth>,
    credential_attempts: Cell<u32>,
}

impl TransferGuard<'_> {
    fn expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn should_abort(&self) -> bool {
        self.cancel.is_cancelled() || self.expired()
    }

    fn callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, username_from_url, allowed| {
            let attempt = self.credential_attempts.get() + 1;
            self.credential_attempts.set(attempt);
            if attempt > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::from_str("credentials rejected by remote"));
            }
            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT)
                && let Some(auth) = self.auth
            {
                let username = if auth.username.is_empty() {
                    username_from_url.unwrap_or("x-access-token")
                } else {
                    auth.username.as_str()
                };
                return Cred::userpass_plaintext(username, &auth.token);
            }
            if allowed.contains(CredentialType::SSH_KEY) {
                return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
            }
            if allowed.contains(CredentialType::USERNAME) {
                return Cred::username(username_from_url.unwrap_or("git"));
            }
            Cred::default()
        });
        callbacks.transfer_progress(move |_progress| !self.should_abort());
        callbacks.sideband_progress(move |_data| !self.should_abort());
        callbacks
    }

    fn fetch_options(&self, prune: bool) -> FetchOptions<'_> {
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.callbacks());
        if prune {
            fo.prune(FetchPrune::On);
        }
        fo
    }

    fn classify(&self, err: &git2::Error, context: &str) -> GitError {
        if self.cancel.is_cancelled() {
            return GitError::interrupted();
        }
        if self.expired() {
            return GitError::new(
                GitErrorKind::Timeout,
                format!("{context}: timed out after {}s", self.timeout.as_secs()),
            );
        }
        if self.credential_attempts.get() > MAX_CREDENTIAL_ATTEMPTS {
            return GitError::new(
                GitErrorKind::Auth,
                format!("{context}: authentication failed"),
            );
        }
        map_git_error(err, context)
    }
}

impl GitClient for Git2Client {
    fn is_repository(&self, dir: &Path) -> bool {
        dir.join(".git").exists() && Repository::open(dir).is_ok()
    }

    fn clone_repo(&self, url: &str, dest: &Path, branch: Option<&str>) -> Result<(), GitError> {
        let guard = self.guard();
        let mut builder = RepoBuilder::new();
        builder.fetch_options(guard.fetch_options(false));
        if let Some(branch) = branch.filter(|branch| !branch.is_empty()) {
            builder.branch(branch);
        }
        info!(path = %dest.display(), "cloning repo");
        builder
            .clone(url, dest)
            .map_err(|err| guard.classify(&err, "clone repo"))?;
        Ok(())
    }

    fn fetch_and_prune(&self, dir: &Path) -> Result<(), GitError> {
        let repo = open(dir)?;
        let guard = self.guard();
        fetch_origin(&repo, &guard, true)
    }

    fn pull(&self, dir: &Path) -> Result<PullOutcome, GitError> {
        let repo = open(dir)?;
        let branch = head_branch(&repo)?.ok_or_else(|| {
            GitError::new(
                GitErrorKind::InvalidInput,
                "HEAD is detached; nothing to pull",
            )
        })?;
        let guard = self.guard();
        fetch_origin(&repo, &guard, false)?;
        fast_forward_branch(&repo, &branch)
    }

    fn fast_forward(&self, dir: &Path) -> Result<PullOutcome, GitError> {
        let repo = open(dir)?;
        let branch = head_branch(&repo)?.ok_or_else(|| {
            GitError::new(
                GitErrorKind::InvalidInput,
                "HEAD is detached; nothing to fast-forward",
            )
        })?;
        fast_forward_branch(&repo, &branch)
    }

    fn has_changes(&self, dir: &Path) -> Result<bool, GitError> {
        let repo = open(dir)?;
        Ok(!is_working_tree_clean(&repo)?)
    }

    fn stash(&self, dir: &Path) -> Result<bool, GitError> {
        let mut repo = open(dir)?;
        let signature = repo
            .signature()
            .or_else(|_| Signature::now("reposync", "reposync@localhost"))
            .map_err(|err| map_git_error(&err, "build stash signature"))?;
        match repo.stash_save(
            &signature,
            "reposync auto-stash",
            Some(StashFlags::INCLUDE_UNTRACKED),
        ) {
            Ok(oid) => {
                debug!(path = %dir.display(), stash = %oid, "stashed local changes");
                Ok(true)
            }
            Err(err) if err.code() == ErrorCode::NotFound => Ok(false),
            Err(err) => Err(map_git_error(&err, "stash changes")),
        }
    }

    fn stash_pop(&self, dir: &Path) -> Result<(), GitError> {
        let mut repo = open(dir)?;
        let mut options = StashApplyOptions::new();
        repo.stash_pop(0, Some(&mut options))
            .map_err(|err| map_git_error(&err, "restore stashed changes"))
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>, GitError> {
        let repo = open(dir)?;
        head_branch(&repo)
    }

    fn merged_branches(&self, dir: &Path, base: &str) -> Result<Vec<String>, GitError> {
        let repo = open(dir)?;
        let base_oid = repo
            .refname_to_id(&format!("refs/heads/{base}"))
            .or_else(|_| repo.refname_to_id(&format!("refs/remotes/origin/{base}")))
            .map_err(|err| map_git_error(&err, "resolve base branch"))?;
        let current = head_branch(&repo)?;
        let branches = repo
            .branches(Some(BranchType::Local))
            .map_err(|err| map_git_error(&err, "list branches"))?;
        let mut merged = Vec::new();
        for entry in branches {
            let (branch, _) = entry.map_err(|err| map_git_error(&err, "read branch"))?;
            let Some(name) = branch
                .name()
                .map_err(|err| map_git_error(&err, "read branch name"))?
                .map(str::to_string)
            else {
                continue;
            };
            if name == base || current.as_deref() == Some(name.as_str()) {
                continue;
            }
            let Some(oid) = branch.get().target() else {
                continue;
            };
            let is_merged = oid == base_oid
                || repo
                    .graph_descendant_of(base_oid, oid)
                    .map_err(|err| map_git_error(&err, "compare branches"))?;
            if is_merged {
                merged.push(name);
            }
        }
        merged.sort();
        Ok(merged)
    }

    fn delete_branch(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        let repo = open(dir)?;
        let mut local = repo
            .find_branch(branch, BranchType::Local)
            .map_err(|err| map_git_error(&err, "find branch"))?;
        local
            .delete()
            .map_err(|err| map_git_error(&err, "delete branch"))
    }
}

fn apply_server_timeout(timeout: Duration) {
    let millis = c_int::try_from(timeout.as_millis())
        .unwrap_or(c_int::MAX)
        .max(1);
    let mut current = match SERVER_TIMEOUT_MS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if current.is_some_and(|current| current <= millis) {
        return;
    }
    // SAFETY: both options are plain integers libgit2 reads when it opens a
    // socket; writes are serialized by SERVER_TIMEOUT_MS.
    let applied = unsafe {
        git2::opts::set_server_connect_timeout_in_milliseconds(millis)
            .and_then(|()| git2::opts::set_server_timeout_in_milliseconds(millis))
    };
    match applied {
        Ok(()) => *current = Some(millis),
        Err(err) => warn!(error = %err, "failed to set git server timeouts"),
    }
}

fn open(dir: &Path) -> Result<Repository, GitError> {
    Repository::open(dir).map_err(|err| map_git_error(&err, "open repo"))
}

fn fetch_origin(repo: &Repository, guard: &TransferGuard<'_>, prune: bool) -> Result<(), GitError> {
    let mut remote = repo
        .find_remote("origin")
        .map_err(|err| map_git_error(&err, "find origin remote"))?;
    let mut fo = guard.fetch_options(prune);
    debug!(prune, "fetching origin");
    remote
        .fetch(&[] as &[&str], Some(&mut fo), None)
        .map_err(|err| guard.classify(&err, "fetch origin"))
}

fn head_branch(repo: &Repository) -> Result<Option<String>, GitError> {
    let head = match repo.head() {
        Ok(head) => head,
        Err(err) if err.code() == ErrorCode::UnbornBranch => return Ok(None),
        Err(err) => return Err(map_git_error(&err, "read HEAD")),
    };
    if !head.is_branch() {
        return Ok(None);
    }
    Ok(head.shorthand().map(str::to_string))
}

fn is_working_tree_clean(repo: &Repository) -> Result<bool, GitError> {
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);
    let statuses = repo
        .statuses(Some(&mut options))
        .map_err(|err| map_git_error(&err, "status repo"))?;
    Ok(statuses.is_empty())
}

fn fast_forward_branch(repo: &Repository, branch: &str) -> Result<PullOutcome, GitError> {
    let local_ref = format!("refs/heads/{branch}");
    let remote_ref = upstream_ref_from_config(repo, branch)?
        .unwrap_or_else(|| format!("refs/remotes/origin/{branch}"));

    let remote_oid = repo.refname_to_id(&remote_ref).map_err(|_| {
        GitError::new(
            GitErrorKind::NotFound,
            format!("branch {branch} has no counterpart {remote_ref}"),
        )
    })?;
    let local_oid = repo
        .refname_to_id(&local_ref)
        .map_err(|err| map_git_error(&err, "resolve local branch"))?;

    let (ahead, behind) = repo
        .graph_ahead_behind(local_oid, remote_oid)
        .map_err(|err| map_git_error(&err, "compare local and remote"))?;

    if ahead > 0 && behind > 0 {
        warn!(branch = %branch, ahead, behind, "branch diverged; skipping fast-forward");
        return Err(GitError::new(
            GitErrorKind::Conflict,
            format!("branch {branch} diverged from {remote_ref} (ahead {ahead}, behind {behind})"),
        ));
    }
    if behind == 0 {
        return Ok(PullOutcome::UpToDate {
            branch: branch.to_string(),
        });
    }

    checkout_commit(repo, remote_oid)?;
    let mut reference = repo
        .find_reference(&local_ref)
        .map_err(|err| map_git_error(&err, "find local ref"))?;
    reference
        .set_target(remote_oid, "reposync: fast-forward")
        .map_err(|err| map_git_error(&err, "set local ref target"))?;
    Ok(PullOutcome::FastForwarded {
        branch: branch.to_string(),
    })
}

fn checkout_commit(repo: &Repository, target: Oid) -> Result<(), GitError> {
    let commit = repo
        .find_commit(target)
        .map_err(|err| map_git_error(&err, "find remote commit"))?;
    let mut checkout = CheckoutBuilder::new();
    checkout.safe();
    repo.checkout_tree(commit.as_object(), Some(&mut checkout))
        .map_err(|err| map_git_error(&err, "checkout fast-forward"))
}

fn upstream_ref_from_config(repo: &Repository, branch_name: &str) -> Result<Option<String>, GitError> {
    let config = repo
        .config()
        .map_err(|err| map_git_error(&err, "open repo config"))?;
    let remote = match config.get_string(&format!("branch.{branch_name}.remote")) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    let merge = match config.get_string(&format!("branch.{branch_name}.merge")) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    if remote == "." {
        return Ok(Some(merge));
    }
    let merged_branch = merge.strip_prefix("refs/heads/").unwrap_or(merge.as_str());
    Ok(Some(format!("refs/remotes/{remote}/{merged_branch}")))
}

fn map_git_error(err: &git2::Error, context: &str) -> GitError {
    let message = format!("{context}: {}", err.message());
    let kind = match err.code() {
        ErrorCode::Auth | ErrorCode::Certificate => GitErrorKind::Auth,
        ErrorCode::NotFound => GitErrorKind::NotFound,
        ErrorCode::Locked => GitErrorKind::Locked,
        ErrorCode::Conflict
        | ErrorCode::MergeConflict
        | ErrorCode::NotFastForward
        | ErrorCode::Uncommitted
        | ErrorCode::Modified => GitErrorKind::Conflict,
        ErrorCode::Exists | ErrorCode::InvalidSpec | ErrorCode::Invalid | ErrorCode::Ambiguous => {
            GitErrorKind::InvalidInput
        }
        ErrorCode::User => GitErrorKind::Interrupted,
        _ => match err.class() {
            Git2Class::Net | Git2Class::Http | Git2Class::Ssh | Git2Class::Ssl => {
                GitErrorKind::Network
            }
            Git2Class::Os | Git2Class::Filesystem => GitErrorKind::Io,
            _ => GitErrorKind::Other,
        },
    };
    GitError::new(kind, message)
}
