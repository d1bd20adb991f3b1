use super::*;

#[derive(Parser)]
#[command(
    name = "reposync",
    author,
    version,
    about = "Clone and update every GitHub repository of an owner"
)]
pub(super) struct Cli {
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides"
    )]
    pub(super) verbose: u8,
    #[command(subcommand)]
    pub(super) command: Commands,
}

#[derive(clap::Subcommand)]
pub(super) enum Commands {
    #[command(about = "Clone missing repositories and update existing ones")]
    Sync(SyncArgs),
    #[command(about = "Inspect configuration")]
    Config(ConfigArgs),
}

#[derive(Parser, Default)]
pub(super) struct SyncArgs {
    #[arg(long, help = "Config file (default: config.local.json, config.json, then user config)")]
    pub(super) config: Option<PathBuf>,
    #[arg(long, help = "GitHub user or organization to sync")]
    pub(super) owner: Option<String>,
    #[arg(long, help = "Directory the repositories are cloned into")]
    pub(super) dest: Option<PathBuf>,
    #[arg(short, long, help = "Concurrent repository operations (1-32)")]
    pub(super) jobs: Option<usize>,
    #[arg(long, help = "Report planned actions without touching the filesystem")]
    pub(super) dry_run: bool,
    #[arg(long, help = "Only update existing clones; never clone")]
    pub(super) sync_only: bool,
    #[arg(long, help = "Stash local changes around the pull")]
    pub(super) auto_stash: bool,
    #[arg(long, help = "Skip fetch --prune before pulling")]
    pub(super) no_prune: bool,
    #[arg(long, help = "Delete local branches already merged into the default branch")]
    pub(super) cleanup: bool,
    #[arg(long, help = "Clone over HTTPS instead of SSH")]
    pub(super) https: bool,
    #[arg(long, help = "Replace non-repository directories and pull over local changes")]
    pub(super) force: bool,
    #[arg(long, help = "Leave archived repositories out")]
    pub(super) skip_archived: bool,
    #[arg(long, help = "Leave forks out")]
    pub(super) skip_forks: bool,
    #[arg(long, help = "Retries for transient git failures")]
    pub(super) retries: Option<u32>,
    #[arg(long, value_name = "SECS", help = "Per-transfer git timeout")]
    pub(super) timeout: Option<u64>,
    #[arg(long, help = "Process lock file path")]
    pub(super) lock_file: Option<PathBuf>,
    #[arg(long, help = "Run without the process lock")]
    pub(super) no_lock: bool,
    #[arg(long, help = "Print the summary as JSON")]
    pub(super) json: bool,
}

impl SyncArgs {
    /// Applies command-line overrides on top of file and environment values.
    pub(super) fn apply(&self, config: &mut SyncConfig) {
        if let Some(owner) = &self.owner {
            config.owner = owner.clone();
        }
        if let Some(dest) = &self.dest {
            config.dest = dest.clone();
        }
        if let Some(jobs) = self.jobs {
            config.max_concurrent_operations = jobs;
        }
        if let Some(retries) = self.retries {
            config.retry_attempts = retries;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_seconds = timeout;
        }
        if let Some(lock_file) = &self.lock_file {
            config.lock_file = Some(lock_file.clone());
        }
        config.dry_run |= self.dry_run;
        config.sync_only |= self.sync_only;
        config.auto_stash |= self.auto_stash;
        config.auto_cleanup |= self.cleanup;
        config.use_https |= self.https;
        config.force |= self.force;
        config.skip_archived |= self.skip_archived;
        config.skip_forks |= self.skip_forks;
        if self.no_prune {
            config.auto_prune = false;
        }
        if self.no_lock {
            config.lock_mode = LockMode::Disabled;
        }
    }
}

#[derive(Parser)]
pub(super) struct ConfigArgs {
    #[command(subcommand)]
    pub(super) command: ConfigCommands,
}

#[derive(clap::Subcommand)]
pub(super) enum ConfigCommands {
    #[command(about = "Print the effective configuration with secrets redacted")]
    Show(ShowConfigArgs),
}

#[derive(Parser)]
pub(super) struct ShowConfigArgs {
    #[arg(long)]
    pub(super) config: Option<PathBuf>,
}
