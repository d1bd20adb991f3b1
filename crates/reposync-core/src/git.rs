use crate::retry::{Classify, ErrorClass};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GitErrorKind {
    Timeout,
    Network,
    Locked,
    Auth,
    NotFound,
    InvalidInput,
    Conflict,
    Io,
    Interrupted,
    Other,
}

impl GitErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitErrorKind::Timeout => "timeout",
            GitErrorKind::Network => "network",
            GitErrorKind::Locked => "locked",
            GitErrorKind::Auth => "auth",
            GitErrorKind::NotFound => "not_found",
            GitErrorKind::InvalidInput => "invalid_input",
            GitErrorKind::Conflict => "conflict",
            GitErrorKind::Io => "io",
            GitErrorKind::Interrupted => "interrupted",
            GitErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for GitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct GitError {
    pub kind: GitErrorKind,
    pub message: String,
}

impl GitError {
    pub fn new(kind: GitErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn interrupted() -> Self {
        Self::new(GitErrorKind::Interrupted, "operation interrupted")
    }

    pub fn is_interrupted(&self) -> bool {
        self.kind == GitErrorKind::Interrupted
    }
}

impl Classify for GitError {
    fn class(&self) -> ErrorClass {
        match self.kind {
            GitErrorKind::Timeout | GitErrorKind::Network | GitErrorKind::Locked => {
                ErrorClass::Retryable
            }
            GitErrorKind::Interrupted => ErrorClass::Interrupt,
            _ => ErrorClass::Fatal,
        }
    }
}

impl From<std::io::Error> for GitError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::TimedOut => GitErrorKind::Timeout,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe => GitErrorKind::Network,
            ErrorKind::NotFound => GitErrorKind::NotFound,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => GitErrorKind::InvalidInput,
            ErrorKind::Interrupted => GitErrorKind::Interrupted,
            _ => GitErrorKind::Io,
        };
        GitError::new(kind, err.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PullOutcome {
    UpToDate { branch: String },
    FastForwarded { branch: String },
}

/// Git operations the sync engine needs against a local working tree.
pub trait GitClient: Send + Sync {
    /// Whether `dir` is the root of a Git working tree.
    fn is_repository(&self, dir: &Path) -> bool;

    fn clone_repo(&self, url: &str, dest: &Path, branch: Option<&str>) -> Result<(), GitError>;

    fn fetch_and_prune(&self, dir: &Path) -> Result<(), GitError>;

    /// Fetches origin and fast-forwards the current branch onto its remote
    /// counterpart.
    fn pull(&self, dir: &Path) -> Result<PullOutcome, GitError>;

    /// Like [`GitClient::pull`] but works from the remote-tracking refs the
    /// last fetch left behind, without contacting the remote.
    fn fast_forward(&self, dir: &Path) -> Result<PullOutcome, GitError>;

    fn has_changes(&self, dir: &Path) -> Result<bool, GitError>;

    /// Stashes local changes, untracked files included. Returns `false` when
    /// there was nothing to stash.
    fn stash(&self, dir: &Path) -> Result<bool, GitError>;

    fn stash_pop(&self, dir: &Path) -> Result<(), GitError>;

    fn current_branch(&self, dir: &Path) -> Result<Option<String>, GitError>;

    /// Local branches already merged into `base`, excluding `base` and the
    /// checked-out branch.
    fn merged_branches(&self, dir: &Path, base: &str) -> Result<Vec<String>, GitError>;

    fn delete_branch(&self, dir: &Path, branch: &str) -> Result<(), GitError>;
}
