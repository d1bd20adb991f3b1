use crate::shutdown::{self, INTERRUPTED_EXIT_CODE};
use crate::logging;
use anyhow::Context;
use clap::Parser;
use reposync_core::cancel::CancelToken;
use reposync_core::config::SyncConfig;
use reposync_core::git_sync::{Git2Client, Git2Options};
use reposync_core::lockfile::LockMode;
use reposync_core::model::{RepoAuth, ResultStatus};
use reposync_core::summary::SyncSummary;
use reposync_core::sync_engine::{SyncError, SyncOrchestrator};
use reposync_github::GitHubSource;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

mod app;
mod args;
mod config_cmd;
mod render;
mod sync_cmd;

use args::*;

use config_cmd::handle_config;
use render::{exit_code_for, print_summary, print_summary_json};
use sync_cmd::handle_sync;

pub fn run() -> anyhow::Result<ExitCode> {
    app::run()
}
