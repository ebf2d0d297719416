// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Transport Traits - Anti-Corruption Layer for the policy service
//!
//! The control channel and the decision client only see these two traits.
//! [`crate::infrastructure::grpc_transport::GrpcTransport`] implements both
//! over tonic; tests substitute scripted in-memory transports.
//!
//! # Architecture
//!
//! - **Layer:** Domain
//! - **Purpose:** Isolate the decision engine from the gRPC stack

use crate::proto::{
    AppGuardHttpRequest, AppGuardHttpResponse, AppGuardResponse, AppGuardTcpConnection,
    AppGuardTcpResponse, ClientMessage, ServerMessage,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tonic::Status;

/// Server-to-client half of an open control stream
pub type ServerMessageStream = BoxStream<'static, Result<ServerMessage, Status>>;

/// Opens bidirectional control streams
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Open a new control stream.
    ///
    /// Messages pushed into `outbound` are delivered to the server in order;
    /// dropping every sender half-closes the client side of the stream.
    async fn open_control_channel(
        &self,
        outbound: mpsc::Receiver<ClientMessage>,
    ) -> Result<ServerMessageStream, Status>;
}

/// Unary decision RPCs
#[async_trait]
pub trait DecisionTransport: Send + Sync {
    async fn handle_tcp_connection(
        &self,
        connection: AppGuardTcpConnection,
    ) -> Result<AppGuardTcpResponse, Status>;

    async fn handle_http_request(
        &self,
        request: AppGuardHttpRequest,
    ) -> Result<AppGuardResponse, Status>;

    async fn handle_http_response(
        &self,
        response: AppGuardHttpResponse,
    ) -> Result<AppGuardResponse, Status>;
}
