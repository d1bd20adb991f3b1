use crate::config::SyncConfig;
use crate::git::GitClient;
use crate::model::RepositoryDescriptor;
use crate::sync_engine_types::SyncAction;
use std::path::Path;
use tracing::debug;

pub(crate) fn filter_repositories(
    repos: Vec<RepositoryDescriptor>,
    config: &SyncConfig,
) -> Vec<RepositoryDescriptor> {
    repos
        .into_iter()
        .filter(|repo| {
            if config.skip_archived && repo.archived {
                debug!(repo = %repo.name, "skipping archived repo");
                return false;
            }
            if config.skip_forks && repo.fork {
                debug!(repo = %repo.name, "skipping fork");
                return false;
            }
            true
        })
        .collect()
}

pub(crate) fn plan_action(git: &dyn GitClient, path: &Path, sync_only: bool) -> SyncAction {
    if path.exists() && git.is_repository(path) {
        return SyncAction::Pull;
    }
    if sync_only {
        SyncAction::Skip
    } else {
        SyncAction::Clone
    }
}
