use reposync_core::model::RepositoryDescriptor;
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// One entry of a GitHub "list repositories" response. Every field is
/// optional; entries are checked when converted.
#[derive(Debug, Deserialize)]
pub(crate) struct RepoItem {
    pub(crate) name: Option<String>,
    pub(crate) full_name: Option<String>,
    pub(crate) clone_url: Option<String>,
    pub(crate) ssh_url: Option<String>,
    pub(crate) default_branch: Option<String>,
    pub(crate) private: Option<bool>,
    pub(crate) archived: Option<bool>,
    pub(crate) fork: Option<bool>,
    pub(crate) pushed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserItem {
    pub(crate) login: String,
}

impl RepoItem {
    /// `Err` carries the reason when the entry has no usable name.
    pub(crate) fn into_descriptor(self) -> Result<RepositoryDescriptor, &'static str> {
        let name = non_blank(self.name).ok_or("repository entry has no name")?;
        let mut repo = RepositoryDescriptor::new(
            name,
            self.clone_url.unwrap_or_default(),
            self.ssh_url.unwrap_or_default(),
        );
        if let Some(full_name) = self.full_name {
            repo.full_name = full_name;
        }
        if let Some(branch) = non_blank(self.default_branch) {
            repo.default_branch = branch;
        }
        repo.private = self.private.unwrap_or(false);
        repo.archived = self.archived.unwrap_or(false);
        repo.fork = self.fork.unwrap_or(false);
        repo.pushed_at = self
            .pushed_at
            .and_then(|value| OffsetDateTime::parse(&value, &Rfc3339).ok());
        Ok(repo)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Converts one raw listing entry. Entries that cannot be read still yield a
/// descriptor, named after whatever identifies them, that fails validation.
/// `position` is the 1-based index across all pages.
pub(crate) fn descriptor_from_value(value: Value, position: usize) -> RepositoryDescriptor {
    let label = ["name", "full_name"]
        .iter()
        .find_map(|key| {
            value
                .get(key)
                .and_then(Value::as_str)
                .filter(|label| !label.trim().is_empty())
        })
        .map(str::to_string)
        .unwrap_or_else(|| format!("<entry {position}>"));
    match serde_json::from_value::<RepoItem>(value) {
        Ok(item) => item
            .into_descriptor()
            .unwrap_or_else(|reason| RepositoryDescriptor::unreadable(label, reason)),
        Err(err) => {
            RepositoryDescriptor::unreadable(label, format!("malformed repository entry: {err}"))
        }
    }
}
