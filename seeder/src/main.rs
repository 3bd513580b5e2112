use anyhow::Context;
use clap::Parser;
use seed_engine::Session;
use seeder::cli::Cli;
use seeder::config::Config;
use seeder::{EngineClient, Fetcher, Scheduler, SyncController, shutdown};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_directives())),
        )
        .init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::from_cli(cli)?;
    let shutdown =
        shutdown::install_signal_handler().context("failed to install signal handlers")?;

    let session = Session::open(config.session_config())
        .await
        .context("failed to open distribution session")?;
    tracing::info!(port = session.listen_port(), "listening for peers");
    let engine = Arc::new(EngineClient::new(session, config.stop_timeout));
    let fetcher = Fetcher::new(config.fetch_timeout)?;
    let controller = Arc::new(SyncController::new(
        config.url.clone(),
        config.data_dir.clone(),
        fetcher,
        engine,
    ));

    controller
        .initialize()
        .await
        .context("failed to prepare data directory")?;
    controller
        .bootstrap()
        .await
        .context("initial synchronization failed")?;

    Scheduler::new(
        controller.clone(),
        config.refresh_interval,
        config.status_interval,
    )
    .run(shutdown)
    .await;

    controller.shutdown().await;
    tracing::info!("shut down");
    Ok(())
}
