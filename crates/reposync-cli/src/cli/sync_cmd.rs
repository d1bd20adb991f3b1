use super::*;

pub(super) fn handle_sync(args: SyncArgs) -> anyhow::Result<ExitCode> {
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let (mut config, source_path) = SyncConfig::discover(args.config.as_deref(), &cwd)?;
    args.apply(&mut config);
    match &source_path {
        Some(path) => info!(path = %path.display(), "loaded config"),
        None => debug!("no config file found; using defaults and environment"),
    }
    debug!(config = ?config, "effective configuration");

    let cancel = CancelToken::new();
    shutdown::install_handler(cancel.clone());

    let auth = config.token().map(|token| RepoAuth {
        username: "x-access-token".to_string(),
        token: token.to_string(),
    });
    let git = Git2Client::new(Git2Options {
        timeout: config.timeout(),
        auth,
        cancel: cancel.clone(),
    });
    let source = GitHubSource::new().context("create GitHub client")?;
    let orchestrator = SyncOrchestrator::new(&source, &git).with_cancel(cancel);

    match orchestrator.run(&config, config.dry_run) {
        Ok(summary) => {
            if args.json {
                print_summary_json(&summary)?;
            } else {
                print_summary(&summary);
            }
            Ok(exit_code_for(&summary))
        }
        Err(SyncError::Interrupted) => {
            eprintln!("Sync interrupted.");
            Ok(ExitCode::from(INTERRUPTED_EXIT_CODE))
        }
    }
}
