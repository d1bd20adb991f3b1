use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

fn default_branch() -> String {
    "main".to_string()
}

/// One remote repository as reported by a [`crate::provider::RepoSource`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    pub clone_url: String,
    pub ssh_url: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub fork: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub pushed_at: Option<OffsetDateTime>,
    /// Set by sources for entries they could not read; such a descriptor
    /// always fails validation with this text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

impl RepositoryDescriptor {
    pub fn new(
        name: impl Into<String>,
        clone_url: impl Into<String>,
        ssh_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            full_name: String::new(),
            clone_url: clone_url.into(),
            ssh_url: ssh_url.into(),
            default_branch: default_branch(),
            private: false,
            archived: false,
            fork: false,
            pushed_at: None,
            problem: None,
        }
    }

    /// Placeholder for a listing entry that could not be read.
    pub fn unreadable(name: impl Into<String>, problem: impl Into<String>) -> Self {
        let mut repo = Self::new(name, "", "");
        repo.problem = Some(problem.into());
        repo
    }

    /// HTTPS URL when `use_https`, SSH URL otherwise.
    pub fn clone_url_for(&self, use_https: bool) -> &str {
        if use_https {
            &self.clone_url
        } else {
            &self.ssh_url
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(problem) = &self.problem {
            return Err(problem.clone());
        }
        if self.name.trim().is_empty() {
            return Err("repository name is empty".to_string());
        }
        for (label, url) in [("clone_url", &self.clone_url), ("ssh_url", &self.ssh_url)] {
            if url.trim().is_empty() {
                return Err(format!("{label} is empty"));
            }
            if url.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
                return Err(format!("{label} is malformed: {url:?}"));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failed,
    Skipped,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Failed => "failed",
            ResultStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of processing a single repository during one run.
///
/// Only the constructors below create values, so a `Failed` result always
/// carries an error string.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessResult {
    pub repo_name: String,
    pub status: ResultStatus,
    pub duration_seconds: f64,
    pub message: String,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ProcessResult {
    pub fn success(repo_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(repo_name.into(), ResultStatus::Success, message.into(), None)
    }

    pub fn skipped(repo_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(repo_name.into(), ResultStatus::Skipped, message.into(), None)
    }

    pub fn failed(
        repo_name: impl Into<String>,
        message: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::build(
            repo_name.into(),
            ResultStatus::Failed,
            message.into(),
            Some(error.into()),
        )
    }

    fn build(
        repo_name: String,
        status: ResultStatus,
        message: String,
        error: Option<String>,
    ) -> Self {
        Self {
            repo_name,
            status,
            duration_seconds: 0.0,
            message,
            error,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = seconds.max(0.0);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RepoAuth {
    pub username: String,
    pub token: String,
}

impl fmt::Debug for RepoAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoAuth")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}
