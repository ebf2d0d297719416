// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Application Layer
//!
//! Stateful services composed by the proxy hooks.

pub mod connection_cache;
pub mod control_channel;
pub mod decision_client;
pub mod policy_cache;
pub mod registry;
pub mod token_gate;

pub use connection_cache::ConnectionInfoCache;
pub use control_channel::{ChannelState, ControlChannelClient, ControlChannelSettings, StopReason};
pub use decision_client::FirewallDecisionClient;
pub use policy_cache::PolicyDecisionCache;
pub use registry::ClientRegistry;
pub use token_gate::TokenGate;
