//! Ferry CLI - operator tooling for the offline mutation queue
//!
//! Inspect queued tasks, retry dead letters, drain against an HTTP backend
//! and reconcile conflicting snapshots from the terminal.

mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::{load_config, resolve_config_path, resolve_db_path};
use crate::commands::config::run_config;
use crate::commands::diff::run_diff;
use crate::commands::drain::run_drain;
use crate::commands::queue::run_queue;
use crate::commands::status::run_status;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "ferry=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config)?;
    let config = load_config(&config_path)?;

    match cli.command {
        Commands::Status { json } => {
            let db_path = resolve_db_path(cli.db_path, &config)?;
            run_status(json, &db_path, &config).await?;
        }
        Commands::Queue { command } => {
            let db_path = resolve_db_path(cli.db_path, &config)?;
            run_queue(command, &db_path, &config).await?;
        }
        Commands::Drain {
            endpoint,
            token,
            entity_path,
            json,
        } => {
            let db_path = resolve_db_path(cli.db_path, &config)?;
            run_drain(endpoint, token, entity_path, json, &db_path, &config).await?;
        }
        Commands::Diff {
            local,
            server,
            take_local,
            take_server,
            all,
            json,
        } => run_diff(&local, &server, &take_local, &take_server, all, json)?,
        Commands::Config { command } => run_config(command, &config_path, &config)?,
    }

    Ok(())
}
