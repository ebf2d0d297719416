// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use gatekeeper_core::domain::config::{GatekeeperConfig, CONFIG_PATH_ENV};

const SAMPLE_CONFIG: &str = include_str!("../../templates/gatekeeper-config.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./gatekeeper.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, force } => generate(&output, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = GatekeeperConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        for (index, path) in GatekeeperConfig::search_paths().iter().enumerate() {
            println!("  {}. {}", index + 3, path.display());
        }
        println!();
    }

    if as_yaml {
        print!("{}", config.to_yaml_string()?);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Policy Service:".bold());
    println!(
        "  Address: {}",
        non_empty(&config.server_addr).unwrap_or("(not set)")
    );
    println!(
        "  Installation code: {}",
        non_empty(&config.installation_code).unwrap_or("(not set)")
    );
    println!("  TLS: {}", if config.tls { "enabled" } else { "disabled" });
    if let Some(cert) = &config.server_cert_path {
        println!("  CA certificate: {}", cert.display());
    }
    println!("  Fallback policy: {}", config.default_policy);
    println!();

    println!("{}", "Timeouts:".bold());
    println!("  Connect: {:?}", config.connect_timeout);
    println!("  RPC deadline: {:?}", config.rpc_timeout);
    println!("  Token wait: {:?}", config.token_timeout);
    println!("  Reconnect backoff: {:?}", config.reconnect_backoff);
    println!();

    println!("{}", "Local State:".bold());
    println!("  Credential store: {}", config.credential_store_path.display());
    println!("  Credential lock: {}", config.credential_lock_name);
    println!("  Connection cache: {} entries", config.connection_cache_capacity);
    if let Some(uuid) = &config.device_uuid {
        println!("  Device UUID override: {}", uuid);
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = GatekeeperConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            output.display()
        );
    }

    std::fs::write(output, SAMPLE_CONFIG)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
