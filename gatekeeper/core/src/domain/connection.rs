// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Connection Identity Types
//!
//! - [`ConnectionKey`]: stable key of one physical connection, derived from its
//!   4-tuple. Both address families are supported; IPv4-mapped IPv6 addresses
//!   are folded to plain IPv4 so that a dual-stack listener produces the same
//!   key regardless of how the socket reports the peer.
//! - [`ConnectionInfo`]: enrichment returned by the policy service for a
//!   connection, valid only while that connection is open.
//! - [`ClientIdentity`]: the remote identity a control channel is opened for.
//!
//! # Architecture
//!
//! - **Layer:** Domain
//! - **Purpose:** Keys shared by the connection cache and the client registry

use crate::proto::AppGuardTcpConnection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Enrichment data the policy service attaches to a connection
pub type ConnectionInfo = crate::proto::AppGuardTcpInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    source: SocketAddr,
    destination: SocketAddr,
}

impl ConnectionKey {
    pub fn new(source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            source: canonical(source),
            destination: canonical(destination),
        }
    }

    /// Derive the key from the connection description sent to the policy
    /// service. Returns `None` when an address or port is missing or invalid.
    pub fn from_connection(connection: &AppGuardTcpConnection) -> Option<Self> {
        let source = socket_addr(
            connection.source_ip.as_deref()?,
            connection.source_port?,
        )?;
        let destination = socket_addr(
            connection.destination_ip.as_deref()?,
            connection.destination_port?,
        )?;
        Some(Self::new(source, destination))
    }

    pub fn source(&self) -> SocketAddr {
        self.source
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.destination)
    }
}

fn canonical(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(addr.ip().to_canonical(), addr.port())
}

fn socket_addr(ip: &str, port: u32) -> Option<SocketAddr> {
    let ip: IpAddr = ip.trim().parse().ok()?;
    let port = u16::try_from(port).ok()?;
    Some(SocketAddr::new(ip, port))
}

/// One configured remote identity. Exactly one control channel exists per
/// identity and is shared by every request that targets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub installation_code: String,
    pub server_addr: String,
    pub tls: bool,
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "https" } else { "http" };
        write!(f, "{}@{}://{}", self.installation_code, scheme, self.server_addr)
    }
}
