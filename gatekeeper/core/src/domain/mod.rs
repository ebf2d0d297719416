// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod fingerprint;
pub mod policy;
pub mod transport;

pub use config::{ConfigError, GatekeeperConfig};
pub use connection::{ClientIdentity, ConnectionInfo, ConnectionKey};
pub use credentials::{Credential, DeviceIdentity};
pub use error::{ClientError, StorageError};
pub use fingerprint::RequestFingerprint;
pub use policy::FallbackPolicy;
pub use transport::{ControlTransport, DecisionTransport, ServerMessageStream};
