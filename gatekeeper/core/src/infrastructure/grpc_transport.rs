// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Policy Service gRPC Client
//!
//! Tonic implementation of [`ControlTransport`] and [`DecisionTransport`].
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** gRPC communication with the policy service
//! - **Integration:** Decision client → AppGuard gRPC API
//!
//! # Connection Management
//!
//! - **Eager connect**: [`GrpcTransport::connect`] waits for the channel to
//!   come up within `connect_timeout`; any failure in that window is reported
//!   as [`ClientError::ConnectionTimeout`].
//! - **TLS**: when enabled, the CA in `server_cert_path` is trusted, falling
//!   back to the bundled web PKI roots.
//! - **Deadlines**: every unary call carries `rpc_timeout` as its gRPC
//!   deadline. The control stream has none.

use crate::domain::config::GatekeeperConfig;
use crate::domain::connection::ClientIdentity;
use crate::domain::error::ClientError;
use crate::domain::transport::{ControlTransport, DecisionTransport, ServerMessageStream};
use crate::proto::appguard::app_guard_client::AppGuardClient;
use crate::proto::{
    AppGuardHttpRequest, AppGuardHttpResponse, AppGuardResponse, AppGuardTcpConnection,
    AppGuardTcpResponse, ClientMessage,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Status};
use tracing::{debug, info, warn};

const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct GrpcTransport {
    client: AppGuardClient<Channel>,
    rpc_timeout: Duration,
}

impl GrpcTransport {
    pub async fn connect(
        identity: &ClientIdentity,
        config: &GatekeeperConfig,
    ) -> Result<Self, ClientError> {
        let endpoint = Self::endpoint(identity, config)?;
        let target = endpoint.uri().to_string();

        let channel = match tokio::time::timeout(config.connect_timeout, endpoint.connect()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                warn!("Failed to connect to policy service at {}: {}", target, e);
                return Err(ClientError::ConnectionTimeout(target));
            }
            Err(_) => {
                warn!(
                    "Policy service at {} not reachable within {:?}",
                    target, config.connect_timeout
                );
                return Err(ClientError::ConnectionTimeout(target));
            }
        };

        info!("Connected to policy service at {}", target);
        Ok(Self {
            client: AppGuardClient::new(channel),
            rpc_timeout: config.rpc_timeout,
        })
    }

    fn endpoint(identity: &ClientIdentity, config: &GatekeeperConfig) -> Result<Endpoint, ClientError> {
        // Ensure address has scheme
        let addr = if identity.server_addr.contains("://") {
            identity.server_addr.clone()
        } else if identity.tls {
            format!("https://{}", identity.server_addr)
        } else {
            format!("http://{}", identity.server_addr)
        };

        let endpoint = Endpoint::from_shared(addr.clone())
            .map_err(|e| ClientError::InvalidConfiguration(format!("invalid server address {addr}: {e}")))?
            .connect_timeout(config.connect_timeout)
            .tcp_keepalive(Some(TCP_KEEPALIVE))
            .http2_keep_alive_interval(TCP_KEEPALIVE)
            .keep_alive_while_idle(true);

        if !identity.tls {
            return Ok(endpoint);
        }

        let tls = match &config.server_cert_path {
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    warn!("Cannot read server certificate {:?}: {}", path, e);
                    ClientError::CertificateNotFound(path.clone())
                })?;
                debug!("Trusting server certificate from {:?}", path);
                ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem))
            }
            None => ClientTlsConfig::new().with_webpki_roots(),
        };

        endpoint
            .tls_config(tls)
            .map_err(|e| ClientError::InvalidConfiguration(format!("TLS setup failed: {e}")))
    }

    fn unary<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        request.set_timeout(self.rpc_timeout);
        request
    }
}

#[async_trait]
impl ControlTransport for GrpcTransport {
    async fn open_control_channel(
        &self,
        outbound: mpsc::Receiver<ClientMessage>,
    ) -> Result<ServerMessageStream, Status> {
        let mut client = self.client.clone();
        let response = client
            .control_channel(ReceiverStream::new(outbound))
            .await?;
        Ok(response.into_inner().boxed())
    }
}

#[async_trait]
impl DecisionTransport for GrpcTransport {
    async fn handle_tcp_connection(
        &self,
        connection: AppGuardTcpConnection,
    ) -> Result<AppGuardTcpResponse, Status> {
        let mut client = self.client.clone();
        let response = client.handle_tcp_connection(self.unary(connection)).await?;
        Ok(response.into_inner())
    }

    async fn handle_http_request(
        &self,
        request: AppGuardHttpRequest,
    ) -> Result<AppGuardResponse, Status> {
        let mut client = self.client.clone();
        let response = client.handle_http_request(self.unary(request)).await?;
        Ok(response.into_inner())
    }

    async fn handle_http_response(
        &self,
        response: AppGuardHttpResponse,
    ) -> Result<AppGuardResponse, Status> {
        let mut client = self.client.clone();
        let response = client.handle_http_response(self.unary(response)).await?;
        Ok(response.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn identity(addr: &str, tls: bool) -> ClientIdentity {
        ClientIdentity {
            installation_code: "INST".to_string(),
            server_addr: addr.to_string(),
            tls,
        }
    }

    #[test]
    fn test_endpoint_adds_scheme() {
        let config = GatekeeperConfig::default();
        let plain = GrpcTransport::endpoint(&identity("127.0.0.1:50051", false), &config).unwrap();
        assert_eq!(plain.uri().scheme_str(), Some("http"));

        let explicit =
            GrpcTransport::endpoint(&identity("http://10.1.1.1:7000", false), &config).unwrap();
        assert_eq!(explicit.uri().host(), Some("10.1.1.1"));
    }

    #[test]
    fn test_missing_certificate_is_reported() {
        let config = GatekeeperConfig {
            server_cert_path: Some(PathBuf::from("/nonexistent/gatekeeper/ca.pem")),
            ..Default::default()
        };
        let result = GrpcTransport::endpoint(&identity("policy.example.net:443", true), &config);
        assert!(matches!(result, Err(ClientError::CertificateNotFound(_))));
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let config = GatekeeperConfig::default();
        let result = GrpcTransport::endpoint(&identity("not a uri", false), &config);
        assert!(matches!(result, Err(ClientError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = GatekeeperConfig {
            connect_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let result = GrpcTransport::connect(&identity(&addr.to_string(), false), &config).await;
        assert!(matches!(result, Err(ClientError::ConnectionTimeout(_))));
    }
}
