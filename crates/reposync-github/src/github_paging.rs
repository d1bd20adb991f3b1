use reposync_core::provider::{SourceError, SourceErrorKind};
use reqwest::Client;

use crate::http::{send_with_retry, transport_error};
use crate::provider_paging::next_link;

pub(crate) const USER_AGENT: &str = "reposync";
pub(crate) const ACCEPT: &str = "application/vnd.github+json";

pub(crate) fn get(client: &Client, url: &str, token: Option<&str>) -> reqwest::RequestBuilder {
    let builder = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .header("Accept", ACCEPT);
    match token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

/// Fetches one page of raw repository entries and the URL of the next page,
/// if any. Entries are converted by the caller so a bad one can still be
/// reported per repository.
pub(crate) async fn fetch_repos_page(
    client: &Client,
    url: &str,
    token: Option<&str>,
) -> Result<(Vec<serde_json::Value>, Option<String>), SourceError> {
    let response = send_with_retry(|| get(client, url, token)).await?;
    let next = next_link(response.headers());
    let payload: Vec<serde_json::Value> = response.json().await.map_err(|err| {
        let mut error = transport_error(err);
        error.kind = SourceErrorKind::Decode;
        error
    })?;
    Ok((payload, next))
}
