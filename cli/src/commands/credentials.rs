// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Credential store commands
//!
//! Commands: list, clear, reset-lock

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use gatekeeper_core::domain::config::GatekeeperConfig;
use gatekeeper_core::infrastructure::{CredentialStore, NamedMutex};

#[derive(Subcommand)]
pub enum CredentialsCommand {
    /// List stored keys (values are never printed)
    List,

    /// Remove every stored credential; workers re-authorize on their next session
    Clear {
        /// Skip the confirmation requirement
        #[arg(long)]
        yes: bool,
    },

    /// Remove the shared lock segment left behind by a crashed process
    ResetLock,
}

pub async fn handle_command(
    command: CredentialsCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    let config = GatekeeperConfig::load_or_default(config_override)
        .context("Failed to load configuration")?;

    match command {
        CredentialsCommand::List => list(&config),
        CredentialsCommand::Clear { yes } => clear(&config, yes),
        CredentialsCommand::ResetLock => reset_lock(&config),
    }
}

fn open_store(config: &GatekeeperConfig) -> Result<CredentialStore> {
    CredentialStore::open(
        config.credential_store_path.clone(),
        &config.credential_lock_name,
    )
    .with_context(|| {
        format!(
            "Failed to open credential store {}",
            config.credential_store_path.display()
        )
    })
}

fn list(config: &GatekeeperConfig) -> Result<()> {
    let store = open_store(config)?;
    let keys = store.keys();

    println!(
        "{} {}",
        "Credential store:".bold(),
        store.path().display()
    );
    if keys.is_empty() {
        println!("  {}", "(empty)".dimmed());
        return Ok(());
    }
    for key in keys {
        println!("  {}", key);
    }
    Ok(())
}

fn clear(config: &GatekeeperConfig, confirmed: bool) -> Result<()> {
    if !confirmed {
        anyhow::bail!("refusing to clear credentials without --yes");
    }

    let store = open_store(config)?;
    store.clear().context("Failed to clear credential store")?;
    println!("{}", "✓ Credential store cleared".green());
    Ok(())
}

fn reset_lock(config: &GatekeeperConfig) -> Result<()> {
    NamedMutex::unlink(&config.credential_lock_name)
        .with_context(|| format!("Failed to remove lock {}", config.credential_lock_name))?;
    println!(
        "{}",
        format!("✓ Lock {} removed", config.credential_lock_name).green()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper_core::Credential;

    fn config(dir: &tempfile::TempDir, lock: &str) -> GatekeeperConfig {
        GatekeeperConfig {
            credential_store_path: dir.path().join("credentials.conf"),
            credential_lock_name: lock.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_clear_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let lock = format!("/gatekeeper-cli-{}", std::process::id());
        let config = config(&dir, &lock);

        let store = open_store(&config).unwrap();
        store
            .save_credential("INST", &Credential::new("id", "secret"))
            .unwrap();

        assert!(clear(&config, false).is_err());
        store.reload().unwrap();
        assert!(store.load_credential("INST").is_some());

        clear(&config, true).unwrap();
        store.reload().unwrap();
        assert!(store.keys().is_empty());

        reset_lock(&config).unwrap();
    }
}
