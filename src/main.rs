//! Binary entry point: CLI parsing, logging setup, signal-driven shutdown,
//! and the init → run → exit-code flow described in the external-interfaces
//! contract (§6 of the design).

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crawlcore::cli::Cli;
use crawlcore::shutdown::ShutdownSignal;
use crawlcore::CrawlEngine;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let engine = match CrawlEngine::init(&cli) {
        Ok(engine) => engine,
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            return ExitCode::from(1);
        }
    };

    tokio::spawn(watch_signals(engine.shutdown()));

    if let Err(err) = engine.run().await {
        tracing::error!(error = %err, "crawl engine exited with error");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

/// A SIGINT or SIGTERM triggers a graceful shutdown via `record_signal`. A
/// second signal (within the time it takes the pipeline to drain) forces an
/// immediate process exit; a third aborts outright, per the cancellation
/// contract in §5/§8 ("within (signal + 5s), either the process exits
/// cleanly or a second signal is received").
async fn watch_signals(shutdown: Arc<ShutdownSignal>) {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGTERM handler");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }

        match shutdown.record_signal() {
            1 => tracing::warn!("stop signal received, shutting down gracefully"),
            2 => {
                tracing::warn!("second stop signal received, forcing immediate termination");
                std::process::exit(2);
            }
            _ => {
                tracing::error!("third stop signal received, aborting");
                std::process::abort();
            }
        }
    }
}
