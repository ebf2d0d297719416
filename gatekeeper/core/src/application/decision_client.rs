// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Firewall Decision Client
//!
//! Request-path facade used by the proxy hooks. Every call first obtains a
//! bearer token from the control channel, then either answers from the policy
//! decision cache or asks the policy service.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Purpose:** Per-connection, per-request and per-response decisions
//!
//! # Caching
//!
//! HTTP requests are answered from and cached under their own fingerprint.
//! HTTP responses always reach the policy service; their verdict is stored
//! under the fingerprint of the request that produced them, so the next
//! identical request is answered from the response-phase decision. TCP connections are never
//! cached here; callers keep the returned enrichment in a
//! [`crate::application::connection_cache::ConnectionInfoCache`].

use crate::application::control_channel::ControlChannelClient;
use crate::application::policy_cache::PolicyDecisionCache;
use crate::domain::error::ClientError;
use crate::domain::fingerprint::RequestFingerprint;
use crate::domain::transport::DecisionTransport;
use crate::proto::{
    AppGuardHttpRequest, AppGuardHttpResponse, AppGuardTcpConnection, AppGuardTcpResponse,
    FirewallPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct FirewallDecisionClient {
    transport: Arc<dyn DecisionTransport>,
    channel: Arc<ControlChannelClient>,
    policy_cache: Arc<PolicyDecisionCache<RequestFingerprint>>,
    token_timeout: Duration,
}

impl FirewallDecisionClient {
    pub fn new(
        transport: Arc<dyn DecisionTransport>,
        channel: Arc<ControlChannelClient>,
        policy_cache: Arc<PolicyDecisionCache<RequestFingerprint>>,
        token_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            channel,
            policy_cache,
            token_timeout,
        }
    }

    pub fn channel(&self) -> &Arc<ControlChannelClient> {
        &self.channel
    }

    pub fn policy_cache(&self) -> &Arc<PolicyDecisionCache<RequestFingerprint>> {
        &self.policy_cache
    }

    /// Current bearer token, waiting up to `token_timeout` for one to arrive.
    ///
    /// A channel that stopped on a storage or transport failure reports that
    /// failure instead of [`ClientError::AuthStreamNotRunning`].
    pub async fn acquire_token(&self) -> Result<String, ClientError> {
        if !self.channel.is_streaming() {
            debug!(state = %self.channel.state(), "Token requested while control channel is not streaming");
            return Err(self
                .channel
                .terminal_error()
                .unwrap_or(ClientError::AuthStreamNotRunning));
        }

        let token = self.channel.token_gate().wait(self.token_timeout).await;
        if token.is_empty() {
            warn!("No token available after {:?}", self.token_timeout);
            metrics::counter!("gatekeeper_token_wait_timeouts_total").increment(1);
            return Err(ClientError::TokenUnavailable);
        }
        Ok(token)
    }

    /// Report a new connection and return its enrichment.
    pub async fn handle_tcp_connection(
        &self,
        mut connection: AppGuardTcpConnection,
    ) -> Result<AppGuardTcpResponse, ClientError> {
        connection.token = self.acquire_token().await?;
        let response = self.transport.handle_tcp_connection(connection).await?;
        metrics::counter!("gatekeeper_decisions_total", "operation" => "tcp_connection", "policy" => "none")
            .increment(1);
        Ok(response)
    }

    pub async fn handle_http_request(
        &self,
        mut request: AppGuardHttpRequest,
    ) -> Result<FirewallPolicy, ClientError> {
        let token = self.acquire_token().await?;

        let fingerprint = RequestFingerprint::from_request(&request);
        if let Some(policy) = self.cached(&fingerprint, "http_request") {
            return Ok(policy);
        }

        request.token = token;
        let policy = self.transport.handle_http_request(request).await?.policy();
        self.record(fingerprint, policy, "http_request");
        Ok(policy)
    }

    /// Decide on `response`, which was produced for `original_request`.
    pub async fn handle_http_response(
        &self,
        mut response: AppGuardHttpResponse,
        original_request: &AppGuardHttpRequest,
    ) -> Result<FirewallPolicy, ClientError> {
        response.token = self.acquire_token().await?;
        let policy = self.transport.handle_http_response(response).await?.policy();
        self.record(
            RequestFingerprint::from_request(original_request),
            policy,
            "http_response",
        );
        Ok(policy)
    }

    fn cached(&self, fingerprint: &RequestFingerprint, operation: &'static str) -> Option<FirewallPolicy> {
        let policy = self.policy_cache.get(fingerprint)?;
        debug!(
            method = fingerprint.method(),
            url = fingerprint.original_url(),
            "Cached {} decision: {}",
            operation,
            policy.as_str_name()
        );
        metrics::counter!("gatekeeper_policy_cache_hits_total", "operation" => operation).increment(1);
        metrics::counter!("gatekeeper_decisions_total", "operation" => operation, "policy" => policy.as_str_name())
            .increment(1);
        Some(policy)
    }

    fn record(&self, fingerprint: RequestFingerprint, policy: FirewallPolicy, operation: &'static str) {
        metrics::counter!("gatekeeper_decisions_total", "operation" => operation, "policy" => policy.as_str_name())
            .increment(1);
        self.policy_cache.put(fingerprint, policy);
    }
}
