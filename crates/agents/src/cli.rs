//! Command line front end for worker binaries.
//!
//! Binaries hand their [`WorkerOptions`] and [`ServerConfig`] to
//! [`run_app`], which parses the subcommand, applies dev-mode overrides
//! and runs the worker until Ctrl-C.

use crate::worker::{ServerConfig, Worker, WorkerOptions};
use clap::{Parser, Subcommand};
use tracing::{error, info};

const DEV_SERVER_URL: &str = "ws://localhost:7880";

#[derive(Parser)]
#[command(version, about = "Run a media room agent worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register against the configured server and serve jobs.
    Start,
    /// Serve jobs against a local dev server on localhost.
    Dev,
}

/// Parses the process arguments and runs the worker to completion.
pub async fn run_app(options: WorkerOptions, mut server: ServerConfig) -> anyhow::Result<()> {
    let cli = Cli::parse();
    if matches!(cli.command, Command::Dev) {
        info!(url = DEV_SERVER_URL, "Dev mode; overriding server url");
        server.url = DEV_SERVER_URL.to_string();
    }

    info!(agent = %options.agent_name(), url = %server.url, "Starting agent worker");
    let worker = Worker::new(options, server);
    worker.run(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received; shutting down"),
        Err(e) => {
            error!(error = %e, "Cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
