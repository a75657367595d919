use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use vcache_server::config::{Opts, Settings};

#[tokio::main]
async fn main() -> ExitCode {
    let opts = Opts::parse();

    let settings = match Settings::load(&opts) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e:#}");
            eprintln!();
            let _ = Opts::command().print_help();
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&settings) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let state = vcache_server::StateInner::new(settings).await?;
    vcache_server::run_migrations(&state).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
            signal.cancel();
        }
    });

    let (server, _) = tokio::join!(
        vcache_server::run_server(state.clone(), shutdown.clone()),
        vcache_server::maintenance::run_maintenance(state.clone(), shutdown.clone()),
    );

    server
}

fn init_logging(settings: &Settings) -> anyhow::Result<()> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(settings.level_filter());

    match &settings.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_filter(tracing::level_filters::LevelFilter::TRACE);
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry().with(stderr_layer).init();
        }
    }
    Ok(())
}
