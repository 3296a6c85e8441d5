use anyhow::{Context, Result};
use clap::Parser;
use sh_cli::{init_tracing, tune, Args};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Exit code after a second Ctrl-C.
const INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json, args.log_level());

    let config = args.into_config().context("invalid arguments")?;
    let stop = Arc::new(AtomicBool::new(false));
    tokio::spawn(watch_interrupts(Arc::clone(&stop)));

    let outcome = tokio::task::spawn_blocking(move || tune(&config, &stop))
        .await
        .context("tuning thread panicked")?
        .context("tuning failed")?;

    info!(
        state = ?outcome.status.state,
        trials = outcome.status.trials_completed,
        run_dir = %outcome.run_dir.display(),
        "Done"
    );
    Ok(())
}

/// First Ctrl-C finishes the running trials and reports the incumbent;
/// the second exits immediately.
async fn watch_interrupts(stop: Arc<AtomicBool>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("Interrupted, waiting for running evaluations (Ctrl-C again to quit)");
    stop.store(true, Ordering::SeqCst);

    if tokio::signal::ctrl_c().await.is_ok() {
        std::process::exit(INTERRUPTED);
    }
}
