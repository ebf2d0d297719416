// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Error Taxonomy
//!
//! Every failure of the decision engine surfaces as a [`ClientError`]. None of
//! these are converted into a policy value inside the core; mapping an error to
//! an allow/deny outcome is the proxy hook layer's job (see
//! [`crate::domain::policy::FallbackPolicy::resolve`]).
//!
//! # Architecture
//!
//! - **Layer:** Domain
//! - **Purpose:** Typed errors for the decision client, control channel and credential store

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the decision client and the components it composes
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("control channel is not streaming")]
    AuthStreamNotRunning,

    #[error("no bearer token became available before the timeout")]
    TokenUnavailable,

    #[error("timed out establishing the channel to {0}")]
    ConnectionTimeout(String),

    #[error("failed to persist device credentials: {0}")]
    CredentialPersistFailure(#[source] StorageError),

    #[error("server certificate not found: {}", .0.display())]
    CertificateNotFound(PathBuf),

    #[error("device UUID is unavailable")]
    DeviceUuidUnavailable,

    #[error("storage operation failed: {0}")]
    StorageOperationFailure(#[from] StorageError),

    #[error("remote call failed: {0}")]
    Transport(#[from] tonic::Status),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl ClientError {
    /// gRPC status code for transport failures, `None` for client-side errors
    pub fn status_code(&self) -> Option<tonic::Code> {
        match self {
            ClientError::Transport(status) => Some(status.code()),
            _ => None,
        }
    }
}

/// Credential store errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("malformed record at line {line}: no unescaped '=' separator")]
    MalformedRecord { line: usize },

    #[error("named lock {name} unavailable: {reason}")]
    Lock { name: String, reason: String },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into().display().to_string(),
            source: Arc::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_keeps_status_code() {
        let err: ClientError = tonic::Status::unavailable("down").into();
        assert_eq!(err.status_code(), Some(tonic::Code::Unavailable));
        assert_eq!(ClientError::TokenUnavailable.status_code(), None);
    }

    #[test]
    fn test_storage_error_converts_into_client_error() {
        let err: ClientError = StorageError::MalformedRecord { line: 3 }.into();
        assert!(matches!(
            err,
            ClientError::StorageOperationFailure(StorageError::MalformedRecord { line: 3 })
        ));
        assert!(err.to_string().contains("line 3"));
    }
}
