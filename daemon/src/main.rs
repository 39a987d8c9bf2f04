mod config;
mod scheduler;

use anyhow::Context;
use clap::Parser;
use config::LoggingConfig;
use scheduler::Scheduler;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(author, version, about = "Periodically archive directories and upload them", long_about = None)]
struct Args {
    /// Config file (.yaml, .yml or .toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Run one backup immediately, before waiting for the schedule
    #[arg(long)]
    run_now: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (config, source) = config::load(args.config.as_deref())?;

    setup_logging(&config.logging)?;
    log::info!("Starting foldup-daemon...");
    match source {
        Some(path) => log::info!("Loaded config from {}", path.display()),
        None => log::info!("No config file found, using defaults"),
    }

    let scheduler = Scheduler::from_config(&config)?;
    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    if args.run_now || config.schedule.run_on_start {
        scheduler.run_once().await?;
    }

    scheduler.run(&cancel).await?;
    log::info!("foldup-daemon stopped");
    Ok(())
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        log::info!("Shutdown requested, stopping once the current backup finishes");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            log::error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn setup_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = std::env::var("FOLDUP_LOG").unwrap_or_else(|_| config.level.clone());
    let level: log::LevelFilter = level
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid log level: {}", level))?;

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(ref path) = config.output {
        dispatch = dispatch.chain(
            fern::log_file(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?,
        );
    }

    dispatch.apply()?;
    Ok(())
}
