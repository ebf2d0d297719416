// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Gatekeeper CLI
//!
//! The `gatekeeper` binary is the operator tool for hosts running the
//! request firewall client.
//!
//! ## Commands
//!
//! - `gatekeeper config show|validate|generate` - Configuration management
//! - `gatekeeper credentials list|clear|reset-lock` - Shared credential store
//! - `gatekeeper check` - Run one connection and request through the decision engine

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{CheckArgs, ConfigCommand, CredentialsCommand};

/// Gatekeeper - request firewall client tooling
#[derive(Parser)]
#[command(name = "gatekeeper")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "GATEKEEPER_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "GATEKEEPER_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Inspect or reset the shared credential store
    #[command(name = "credentials")]
    Credentials {
        #[command(subcommand)]
        command: CredentialsCommand,
    },

    /// Ask the policy service for a decision on a synthetic request
    #[command(name = "check")]
    Check(CheckArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
        Commands::Credentials { command } => {
            commands::credentials::handle_command(command, cli.config).await
        }
        Commands::Check(args) => commands::check::execute(args, cli.config).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
