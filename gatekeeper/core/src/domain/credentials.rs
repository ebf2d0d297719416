// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Device Credentials and Identity
//!
//! A [`Credential`] is issued once per installation code when the device is
//! authorized and is then shared with every proxy worker through the
//! credential store. [`DeviceIdentity`] describes the host in the
//! authorization request.
//!
//! # Architecture
//!
//! - **Layer:** Domain
//! - **Purpose:** Credential value type and device identity discovery

use crate::domain::error::ClientError;
use std::fmt;
use std::path::{Path, PathBuf};

/// Client type announced in every authorization request
pub const CLIENT_TYPE: &str = "Nginx";

/// Client category announced in every authorization request
pub const CLIENT_CATEGORY: &str = "AppGuard";

/// Sources probed for a stable machine identifier, in order
pub const DEVICE_UUID_SOURCES: [&str; 2] = ["/sys/class/dmi/id/product_uuid", "/etc/machine-id"];

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub app_id: String,
    pub app_secret: String,
}

impl Credential {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
        }
    }

    /// Store key holding the app id for an installation code
    pub fn app_id_key(installation_code: &str) -> String {
        format!("{installation_code}.app_id")
    }

    /// Store key holding the app secret for an installation code
    pub fn app_secret_key(installation_code: &str) -> String {
        format!("{installation_code}.app_secret")
    }
}

// Keep the secret out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

/// Host description sent with the authorization request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub uuid: String,
    pub target_os: String,
}

impl DeviceIdentity {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            target_os: std::env::consts::OS.to_string(),
        }
    }

    /// Resolve the device identity, preferring an explicit override.
    pub fn discover(override_uuid: Option<&str>) -> Result<Self, ClientError> {
        let sources: Vec<PathBuf> = DEVICE_UUID_SOURCES.iter().map(PathBuf::from).collect();
        Self::discover_from(override_uuid, &sources)
    }

    pub(crate) fn discover_from(
        override_uuid: Option<&str>,
        sources: &[PathBuf],
    ) -> Result<Self, ClientError> {
        if let Some(uuid) = override_uuid.map(str::trim).filter(|uuid| !uuid.is_empty()) {
            return Ok(Self::new(uuid));
        }

        sources
            .iter()
            .find_map(|path| read_identifier(path))
            .map(Self::new)
            .ok_or(ClientError::DeviceUuidUnavailable)
    }
}

fn read_identifier(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let id = content.trim();
            (!id.is_empty()).then(|| id.to_string())
        }
        Err(e) => {
            tracing::debug!("Device identifier source {:?} unavailable: {}", path, e);
            None
        }
    }
}
