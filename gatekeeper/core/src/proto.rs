// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

// Generated protobuf code from tonic/prost. Both packages live side by side
// because `appguard` refers to `super::appguard_commands`.

pub mod appguard {
    tonic::include_proto!("appguard");
}

pub mod appguard_commands {
    tonic::include_proto!("appguard_commands");
}

pub use appguard::{
    AppGuardHttpRequest, AppGuardHttpResponse, AppGuardIpInfo, AppGuardResponse,
    AppGuardTcpConnection, AppGuardTcpInfo, AppGuardTcpResponse,
};
pub use appguard_commands::{client_message, server_message, ClientMessage, FirewallPolicy, ServerMessage};
