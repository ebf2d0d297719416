// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # `gatekeeper-core` - Request Firewall Decision Engine
//!
//! Asks a remote policy service whether each connection, HTTP request and
//! HTTP response observed by a reverse proxy should be allowed or denied.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`proto`] | Wire | Generated `appguard` / `appguard_commands` gRPC types |
//! | [`domain`] | Domain | Configuration, errors, keys, fingerprints, transport traits |
//! | [`application`] | Application | Token gate, caches, control channel, decision client |
//! | [`infrastructure`] | Infrastructure | Credential store, named mutex, gRPC transport |
//!
//! ## Flow
//!
//! The proxy hook layer calls [`application::FirewallDecisionClient`] for
//! every connection/request/response event. The decision client pulls a bearer
//! token from the [`application::TokenGate`], which is fed asynchronously by
//! the [`application::ControlChannelClient`] background task.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod proto;

#[cfg(test)]
mod test_support;

pub use application::{
    ChannelState, ClientRegistry, ConnectionInfoCache, ControlChannelClient,
    FirewallDecisionClient, PolicyDecisionCache, StopReason, TokenGate,
};
pub use domain::*;
pub use infrastructure::{CredentialStore, GrpcTransport};
