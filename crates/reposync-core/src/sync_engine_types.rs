use crate::model::ProcessResult;

/// What the engine decided to do with one repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncAction {
    Clone,
    Pull,
    Skip,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Clone => "clone",
            SyncAction::Pull => "pull",
            SyncAction::Skip => "skip",
        }
    }
}

/// Per-repository switches derived from the run configuration.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RepoOptions {
    pub(crate) use_https: bool,
    pub(crate) sync_only: bool,
    pub(crate) auto_stash: bool,
    pub(crate) auto_prune: bool,
    pub(crate) auto_cleanup: bool,
    pub(crate) force: bool,
    pub(crate) dry_run: bool,
}

/// The run must stop: the user cancelled or git reported an interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Interrupted;

pub(crate) enum RepoEvent {
    Finished { index: usize, result: ProcessResult },
    Interrupted,
}
