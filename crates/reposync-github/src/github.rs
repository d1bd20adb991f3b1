use crate::github_models::{UserItem, descriptor_from_value};
use crate::github_paging::{fetch_repos_page, get};
use crate::http::{send_with_retry, transport_error};
use reposync_core::model::RepositoryDescriptor;
use reposync_core::provider::{RepoSource, SourceError, SourceErrorKind};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const PER_PAGE: u32 = 100;
const MAX_PAGES: usize = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Lists repositories through the GitHub REST API.
pub struct GitHubSource {
    client: Client,
    api_base: String,
}

impl GitHubSource {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(DEFAULT_API_URL)
    }

    pub fn with_base_url(api_base: &str) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    pub async fn list_repositories_async(
        &self,
        owner: &str,
        token: Option<&str>,
    ) -> Result<Vec<RepositoryDescriptor>, SourceError> {
        validate_owner(owner)?;
        let login = match token {
            Some(token) => Some(self.authenticated_login(token).await?),
            None => None,
        };
        let own_account = login
            .as_deref()
            .is_some_and(|login| login.eq_ignore_ascii_case(owner));
        let first_page = if own_account {
            format!(
                "{}/user/repos?affiliation=owner,collaborator,organization_member&per_page={PER_PAGE}",
                self.api_base
            )
        } else {
            format!("{}/users/{owner}/repos?per_page={PER_PAGE}", self.api_base)
        };
        debug!(owner = %owner, own_account, "listing GitHub repositories");

        let mut repos = Vec::new();
        let mut unreadable = 0usize;
        let mut next = Some(first_page);
        let mut pages = 0usize;
        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                warn!(owner = %owner, pages = MAX_PAGES, "stopping pagination at page limit");
                break;
            }
            let (entries, next_url) = fetch_repos_page(&self.client, &url, token).await?;
            for entry in entries {
                let repo = descriptor_from_value(entry, repos.len() + 1);
                if let Some(problem) = &repo.problem {
                    warn!(owner = %owner, repo = %repo.name, problem = %problem, "unreadable repository entry");
                    unreadable += 1;
                }
                repos.push(repo);
            }
            next = next_url.filter(|next_url| *next_url != url);
        }
        info!(owner = %owner, count = repos.len(), unreadable, pages, "fetched repositories from GitHub");
        Ok(repos)
    }

    async fn authenticated_login(&self, token: &str) -> Result<String, SourceError> {
        let url = format!("{}/user", self.api_base);
        let response = send_with_retry(|| get(&self.client, &url, Some(token))).await?;
        let user: UserItem = response.json().await.map_err(|err| {
            let mut error = transport_error(err);
            error.kind = SourceErrorKind::Decode;
            error
        })?;
        Ok(user.login)
    }
}

impl RepoSource for GitHubSource {
    fn list_repositories(
        &self,
        owner: &str,
        token: Option<&str>,
    ) -> Result<Vec<RepositoryDescriptor>, SourceError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| {
                SourceError::new(SourceErrorKind::Other, format!("start async runtime: {err}"))
            })?;
        runtime.block_on(self.list_repositories_async(owner, token))
    }
}

fn validate_owner(owner: &str) -> Result<(), SourceError> {
    let valid = !owner.is_empty()
        && owner
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SourceError::new(
            SourceErrorKind::Other,
            format!("invalid GitHub owner {owner:?}"),
        ))
    }
}
