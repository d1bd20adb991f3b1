use super::*;

pub(super) fn handle_config(args: ConfigArgs) -> anyhow::Result<ExitCode> {
    match args.command {
        ConfigCommands::Show(args) => handle_show(args),
    }
}

fn handle_show(args: ShowConfigArgs) -> anyhow::Result<ExitCode> {
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let (config, source) = SyncConfig::discover(args.config.as_deref(), &cwd)?;
    match &source {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# no config file found; showing defaults"),
    }
    println!("{}", redacted_json(&config)?);
    Ok(ExitCode::SUCCESS)
}

pub(super) fn redacted_json(config: &SyncConfig) -> anyhow::Result<String> {
    let mut shown = config.clone();
    if shown.github_token.is_some() {
        shown.github_token = Some("<redacted>".to_string());
    }
    serde_json::to_string_pretty(&shown).context("serialize config")
}
