use crate::model::RepositoryDescriptor;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceErrorKind {
    Auth,
    RateLimited,
    NotFound,
    Network,
    Decode,
    Other,
}

impl SourceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceErrorKind::Auth => "auth",
            SourceErrorKind::RateLimited => "rate_limited",
            SourceErrorKind::NotFound => "not_found",
            SourceErrorKind::Network => "network",
            SourceErrorKind::Decode => "decode",
            SourceErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct SourceError {
    pub kind: SourceErrorKind,
    /// HTTP status when the failure came from a response.
    pub status: Option<u16>,
    pub message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Lists the remote repositories of an owner.
pub trait RepoSource: Send + Sync {
    fn list_repositories(
        &self,
        owner: &str,
        token: Option<&str>,
    ) -> Result<Vec<RepositoryDescriptor>, SourceError>;
}

/// Fixed list of repositories, handy for offline runs and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticSource {
    repos: Vec<RepositoryDescriptor>,
}

impl StaticSource {
    pub fn new(repos: Vec<RepositoryDescriptor>) -> Self {
        Self { repos }
    }
}

impl RepoSource for StaticSource {
    fn list_repositories(
        &self,
        _owner: &str,
        _token: Option<&str>,
    ) -> Result<Vec<RepositoryDescriptor>, SourceError> {
        Ok(self.repos.clone())
    }
}
