// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

// Gatekeeper Configuration Types
//
// Typed settings for one proxy deployment:
// - Remote identity (server address, installation code, transport mode)
// - Fallback policy applied when the policy service cannot decide
// - Timeouts for channel establishment, RPCs, token waits and reconnects
// - Location of the shared credential store and its cross-process lock

use crate::domain::connection::ClientIdentity;
use crate::domain::policy::FallbackPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default location of the shared credential store
pub const DEFAULT_CREDENTIAL_STORE_PATH: &str = "/var/lib/gatekeeper/credentials.conf";

/// Default name of the cross-process mutex guarding the credential store
pub const DEFAULT_CREDENTIAL_LOCK_NAME: &str = "/gatekeeper-credentials";

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "GATEKEEPER_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Address of the policy service (e.g. "policy.example.net:50051")
    #[serde(default)]
    pub server_addr: String,

    /// Installation code provisioned out-of-band
    #[serde(default)]
    pub installation_code: String,

    /// Connect over TLS
    #[serde(default)]
    pub tls: bool,

    /// PEM file with the CA certificate trusted for the policy service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_cert_path: Option<PathBuf>,

    /// Policy applied when the service answers UNKNOWN or cannot be reached
    #[serde(default)]
    pub default_policy: FallbackPolicy,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(default = "default_rpc_timeout", with = "humantime_serde")]
    pub rpc_timeout: Duration,

    #[serde(default = "default_token_timeout", with = "humantime_serde")]
    pub token_timeout: Duration,

    #[serde(default = "default_reconnect_backoff", with = "humantime_serde")]
    pub reconnect_backoff: Duration,

    #[serde(default = "default_connection_cache_capacity")]
    pub connection_cache_capacity: usize,

    #[serde(default = "default_credential_store_path")]
    pub credential_store_path: PathBuf,

    #[serde(default = "default_credential_lock_name")]
    pub credential_lock_name: String,

    /// Overrides device UUID discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_uuid: Option<String>,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_token_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_reconnect_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_connection_cache_capacity() -> usize {
    1024
}

fn default_credential_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_CREDENTIAL_STORE_PATH)
}

fn default_credential_lock_name() -> String {
    DEFAULT_CREDENTIAL_LOCK_NAME.to_string()
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            server_addr: String::new(),
            installation_code: String::new(),
            tls: false,
            server_cert_path: None,
            default_policy: FallbackPolicy::default(),
            connect_timeout: default_connect_timeout(),
            rpc_timeout: default_rpc_timeout(),
            token_timeout: default_token_timeout(),
            reconnect_backoff: default_reconnect_backoff(),
            connection_cache_capacity: default_connection_cache_capacity(),
            credential_store_path: default_credential_store_path(),
            credential_lock_name: default_credential_lock_name(),
            device_uuid: None,
        }
    }
}

impl GatekeeperConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serialize configuration to YAML
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. GATEKEEPER_CONFIG_PATH environment variable
    /// 2. ./gatekeeper.yaml (working directory)
    /// 3. /etc/gatekeeper/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!("{} points to missing file: {:?}", CONFIG_PATH_ENV, path);
        }

        Self::search_paths().into_iter().find(|path| path.exists())
    }

    /// Candidate paths checked by [`Self::discover_config`] after the environment
    pub fn search_paths() -> Vec<PathBuf> {
        vec![
            PathBuf::from("./gatekeeper.yaml"),
            PathBuf::from("/etc/gatekeeper/config.yaml"),
        ]
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from CLI-specified path: {:?}", path);
            return Self::from_yaml_file(path);
        }

        if let Some(path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", path);
            return Self::from_yaml_file(path);
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Validate settings needed to connect to the policy service
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("server_addr cannot be empty".into()));
        }

        if self.installation_code.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "installation_code cannot be empty".into(),
            ));
        }

        if self.connection_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "connection_cache_capacity must be at least 1".into(),
            ));
        }

        if !self.credential_lock_name.starts_with('/') || self.credential_lock_name.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "credential_lock_name must look like \"/name\": {}",
                self.credential_lock_name
            )));
        }

        if self.credential_lock_name[1..].contains('/') {
            return Err(ConfigError::Invalid(format!(
                "credential_lock_name cannot contain further slashes: {}",
                self.credential_lock_name
            )));
        }

        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("rpc_timeout", self.rpc_timeout),
            ("token_timeout", self.token_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }

        Ok(())
    }

    /// Remote identity this configuration connects as
    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity {
            installation_code: self.installation_code.clone(),
            server_addr: self.server_addr.clone(),
            tls: self.tls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatekeeperConfig::default();
        assert_eq!(config.token_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect_backoff, Duration::from_secs(5));
        assert_eq!(config.connection_cache_capacity, 1024);
        assert_eq!(config.default_policy, FallbackPolicy::Deny);
        assert_eq!(
            config.credential_store_path,
            PathBuf::from(DEFAULT_CREDENTIAL_STORE_PATH)
        );
        assert!(!config.tls);
    }

    #[test]
    fn test_yaml_with_overrides() {
        let yaml = r#"
server_addr: "policy.internal:50051"
installation_code: "INST-42"
tls: true
server_cert_path: /etc/gatekeeper/ca.pem
default_policy: allow
token_timeout: 250ms
reconnect_backoff: 2s
connection_cache_capacity: 16
"#;
        let config = GatekeeperConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.server_addr, "policy.internal:50051");
        assert_eq!(config.installation_code, "INST-42");
        assert!(config.tls);
        assert_eq!(
            config.server_cert_path,
            Some(PathBuf::from("/etc/gatekeeper/ca.pem"))
        );
        assert_eq!(config.default_policy, FallbackPolicy::Allow);
        assert_eq!(config.token_timeout, Duration::from_millis(250));
        assert_eq!(config.reconnect_backoff, Duration::from_secs(2));
        assert_eq!(config.connection_cache_capacity, 16);
        // untouched fields keep their defaults
        assert_eq!(config.rpc_timeout, Duration::from_secs(5));
        assert_eq!(config.credential_lock_name, DEFAULT_CREDENTIAL_LOCK_NAME);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = GatekeeperConfig::default();
        assert!(config.validate().is_err());

        config.server_addr = "localhost:50051".to_string();
        assert!(config.validate().is_err());

        config.installation_code = "code".to_string();
        assert!(config.validate().is_ok());

        config.connection_cache_capacity = 0;
        assert!(config.validate().is_err());
        config.connection_cache_capacity = 8;

        config.credential_lock_name = "no-leading-slash".to_string();
        assert!(config.validate().is_err());
        config.credential_lock_name = "/nested/name".to_string();
        assert!(config.validate().is_err());
        config.credential_lock_name = "/ok".to_string();

        config.token_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identity() {
        let config = GatekeeperConfig {
            server_addr: "10.0.0.1:50051".to_string(),
            installation_code: "abc".to_string(),
            tls: true,
            ..Default::default()
        };
        let identity = config.identity();
        assert_eq!(identity.installation_code, "abc");
        assert_eq!(identity.server_addr, "10.0.0.1:50051");
        assert!(identity.tls);
    }
}
