use super::*;

pub(super) fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    debug!(command = command_label(&cli.command), "running command");

    match cli.command {
        Commands::Sync(args) => handle_sync(args),
        Commands::Config(args) => handle_config(args),
    }
}

fn command_label(command: &Commands) -> &'static str {
    match command {
        Commands::Sync(_) => "sync",
        Commands::Config(_) => "config",
    }
}
