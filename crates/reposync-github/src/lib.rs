//! GitHub implementation of [`reposync_core::provider::RepoSource`].

mod github;
mod github_models;
mod github_paging;
mod http;
mod provider_paging;

pub use github::{DEFAULT_API_URL, GitHubSource};
