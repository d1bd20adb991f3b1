use reposync_core::cancel::CancelToken;
use std::io::IsTerminal;
use tracing::warn;

/// Exit status used when the user interrupts a run.
pub(crate) const INTERRUPTED_EXIT_CODE: u8 = 130;

/// Watches for Ctrl+C on a background thread. The first press cancels
/// `cancel`; the second one exits the process immediately.
pub(crate) fn install_handler(cancel: CancelToken) {
    let spawned = std::thread::Builder::new()
        .name("reposync-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!(error = %err, "Ctrl+C handler unavailable");
                    return;
                }
            };
            runtime.block_on(async move {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                let is_tty = std::io::stderr().is_terminal();
                if is_tty {
                    eprintln!("\nShutdown requested, finishing current operations...");
                    eprintln!("Press Ctrl+C again to force quit.");
                } else {
                    warn!("shutdown requested; finishing current operations");
                }
                cancel.cancel();

                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                if is_tty {
                    eprintln!("Force quit!");
                }
                std::process::exit(i32::from(INTERRUPTED_EXIT_CODE));
            });
        });
    if let Err(err) = spawned {
        warn!(error = %err, "failed to spawn Ctrl+C handler thread");
    }
}
