// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Policy Container Host CLI
//!
//! The `policy-host` binary runs the container host: it keeps periodic
//! policies scheduled from a blob container and dispatches event-mode
//! policies for audit events arriving on a storage queue.
//!
//! ## Commands
//!
//! - `policy-host run` - Run the host until SIGINT/SIGTERM (default)
//! - `policy-host validate <FILE>...` - Check policy documents
//! - `policy-host config` - Show the configuration resolved from the environment
//!
//! A `.env` file in the working directory is loaded first, if present.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

use policy_host::commands;

/// Policy Container Host - scheduled and event-driven cloud policies
#[derive(Parser)]
#[command(name = "policy-host")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, env = "POLICY_HOST_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(
        long,
        global = true,
        env = "POLICY_HOST_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text
    )]
    log_format: LogFormat,

    /// Serve Prometheus metrics on this address (e.g. 0.0.0.0:9090)
    #[arg(long, global = true, env = "POLICY_HOST_METRICS_LISTEN", value_name = "ADDR")]
    metrics_listen: Option<SocketAddr>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the container host
    #[command(name = "run")]
    Run,

    /// Parse policy documents and print what the host would do with them
    #[command(name = "validate")]
    Validate {
        /// Policy documents to check
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Extra operation aliases (YAML)
        #[arg(long, env = "OPERATION_ALIASES_FILE", value_name = "FILE")]
        aliases: Option<PathBuf>,
    },

    /// Show the resolved configuration
    #[command(name = "config")]
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run::execute(cli.metrics_listen).await,
        Commands::Validate { files, aliases } => commands::validate::execute(&files, aliases),
        Commands::Config => commands::config::execute(),
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}
