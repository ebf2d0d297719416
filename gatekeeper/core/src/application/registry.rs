// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Client Registry
//!
//! Process-wide table of decision clients keyed by [`ClientIdentity`]. The
//! first request for an identity connects to the policy service and starts
//! its control channel; every later request reuses that client. The registry
//! also owns the caches and credential store shared by all clients in the
//! process.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Purpose:** One control channel per remote identity

use crate::application::connection_cache::ConnectionInfoCache;
use crate::application::control_channel::{ControlChannelClient, ControlChannelSettings};
use crate::application::decision_client::FirewallDecisionClient;
use crate::application::policy_cache::PolicyDecisionCache;
use crate::application::token_gate::TokenGate;
use crate::domain::config::GatekeeperConfig;
use crate::domain::connection::ClientIdentity;
use crate::domain::credentials::DeviceIdentity;
use crate::domain::error::ClientError;
use crate::domain::fingerprint::RequestFingerprint;
use crate::domain::policy::FallbackPolicy;
use crate::domain::transport::{ControlTransport, DecisionTransport};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::grpc_transport::GrpcTransport;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::info;

pub struct ClientRegistry {
    config: GatekeeperConfig,
    device: DeviceIdentity,
    store: Arc<CredentialStore>,
    policy_cache: Arc<PolicyDecisionCache<RequestFingerprint>>,
    connection_cache: Arc<ConnectionInfoCache>,
    clients: Mutex<HashMap<ClientIdentity, Arc<ClientSlot>>>,
}

type ClientSlot = OnceCell<Arc<FirewallDecisionClient>>;

impl ClientRegistry {
    pub fn new(config: GatekeeperConfig, device: DeviceIdentity, store: Arc<CredentialStore>) -> Self {
        let connection_cache = Arc::new(ConnectionInfoCache::new(config.connection_cache_capacity));
        Self {
            config,
            device,
            store,
            policy_cache: Arc::new(PolicyDecisionCache::new(false)),
            connection_cache,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Validate `config`, open its credential store and resolve the device
    /// identity.
    pub fn from_config(config: GatekeeperConfig) -> Result<Self, ClientError> {
        config
            .validate()
            .map_err(|e| ClientError::InvalidConfiguration(e.to_string()))?;

        let device = DeviceIdentity::discover(config.device_uuid.as_deref())?;
        let store = CredentialStore::open(
            config.credential_store_path.clone(),
            &config.credential_lock_name,
        )?;

        Ok(Self::new(config, device, Arc::new(store)))
    }

    pub fn config(&self) -> &GatekeeperConfig {
        &self.config
    }

    pub fn default_policy(&self) -> FallbackPolicy {
        self.config.default_policy
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn connection_cache(&self) -> &Arc<ConnectionInfoCache> {
        &self.connection_cache
    }

    pub fn policy_cache(&self) -> &Arc<PolicyDecisionCache<RequestFingerprint>> {
        &self.policy_cache
    }

    /// Client for the configured identity
    pub async fn client(&self) -> Result<Arc<FirewallDecisionClient>, ClientError> {
        let identity = self.config.identity();
        self.get_or_connect(&identity).await
    }

    /// Existing client for `identity`, or a freshly connected one.
    pub async fn get_or_connect(
        &self,
        identity: &ClientIdentity,
    ) -> Result<Arc<FirewallDecisionClient>, ClientError> {
        let config = &self.config;
        self.get_or_create(identity, || async move {
            GrpcTransport::connect(identity, config).await.map(Arc::new)
        })
        .await
    }

    pub(crate) async fn get_or_create<T, F, Fut>(
        &self,
        identity: &ClientIdentity,
        connect: F,
    ) -> Result<Arc<FirewallDecisionClient>, ClientError>
    where
        T: ControlTransport + DecisionTransport + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, ClientError>>,
    {
        // The map lock only covers the slot lookup; concurrent first requests
        // for one identity share the slot's initialization.
        let slot = self
            .clients
            .lock()
            .await
            .entry(identity.clone())
            .or_default()
            .clone();

        let client = slot
            .get_or_try_init(move || async move {
                let transport = connect().await?;
                info!("Registered decision client for {}", identity);
                Ok::<_, ClientError>(Arc::new(self.assemble(identity, transport)))
            })
            .await?;
        Ok(client.clone())
    }

    fn assemble<T>(&self, identity: &ClientIdentity, transport: Arc<T>) -> FirewallDecisionClient
    where
        T: ControlTransport + DecisionTransport + 'static,
    {
        let channel = ControlChannelClient::start(
            ControlChannelSettings {
                installation_code: identity.installation_code.clone(),
                device: self.device.clone(),
                reconnect_backoff: self.config.reconnect_backoff,
            },
            transport.clone(),
            self.store.clone(),
            Arc::new(TokenGate::new()),
            self.policy_cache.clone(),
        );

        FirewallDecisionClient::new(
            transport,
            Arc::new(channel),
            self.policy_cache.clone(),
            self.config.token_timeout,
        )
    }

    /// Number of connected clients
    pub async fn client_count(&self) -> usize {
        self.clients
            .lock()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Stop every control channel and forget all clients.
    pub async fn shutdown(&self) {
        let slots: Vec<_> = self.clients.lock().await.drain().collect();
        for (identity, slot) in slots {
            if let Some(client) = slot.get() {
                client.channel().stop().await;
                info!("Stopped decision client for {}", identity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::control_channel::ChannelState;
    use crate::domain::transport::ServerMessageStream;
    use crate::proto::{
        AppGuardHttpRequest, AppGuardHttpResponse, AppGuardResponse, AppGuardTcpConnection,
        AppGuardTcpResponse, ClientMessage, FirewallPolicy,
    };
    use crate::test_support::{
        authorized, token_update, CountingDecisionTransport, ScriptedControlTransport, Session,
        TestStore,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tonic::Status;

    struct FakeService {
        control: ScriptedControlTransport,
        decisions: CountingDecisionTransport,
    }

    #[async_trait]
    impl ControlTransport for FakeService {
        async fn open_control_channel(
            &self,
            outbound: mpsc::Receiver<ClientMessage>,
        ) -> Result<ServerMessageStream, Status> {
            self.control.open_control_channel(outbound).await
        }
    }

    #[async_trait]
    impl DecisionTransport for FakeService {
        async fn handle_tcp_connection(
            &self,
            connection: AppGuardTcpConnection,
        ) -> Result<AppGuardTcpResponse, Status> {
            self.decisions.handle_tcp_connection(connection).await
        }

        async fn handle_http_request(
            &self,
            request: AppGuardHttpRequest,
        ) -> Result<AppGuardResponse, Status> {
            self.decisions.handle_http_request(request).await
        }

        async fn handle_http_response(
            &self,
            response: AppGuardHttpResponse,
        ) -> Result<AppGuardResponse, Status> {
            self.decisions.handle_http_response(response).await
        }
    }

    fn fake_service() -> Arc<FakeService> {
        Arc::new(FakeService {
            control: ScriptedControlTransport::new(vec![Session::open(vec![
                authorized(Some(("app", "secret"))),
                token_update("tok"),
            ])]),
            decisions: CountingDecisionTransport::new(FirewallPolicy::Allow),
        })
    }

    fn registry(store: &TestStore) -> ClientRegistry {
        let config = GatekeeperConfig {
            server_addr: "127.0.0.1:50051".to_string(),
            installation_code: "INST".to_string(),
            ..Default::default()
        };
        ClientRegistry::new(config, DeviceIdentity::new("device"), store.store.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_client_per_identity() {
        let store = TestStore::new();
        let registry = registry(&store);
        let identity = registry.config().identity();
        let connects = AtomicUsize::new(0);

        let first = registry
            .get_or_create(&identity, || async {
                connects.fetch_add(1, Ordering::SeqCst);
                Ok(fake_service())
            })
            .await
            .unwrap();
        let second = registry
            .get_or_create(&identity, || async {
                connects.fetch_add(1, Ordering::SeqCst);
                Ok(fake_service())
            })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(registry.client_count().await, 1);

        let other = ClientIdentity {
            installation_code: "OTHER".to_string(),
            ..identity.clone()
        };
        let third = registry
            .get_or_create(&other, || async { Ok(fake_service()) })
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.channel().installation_code(), "OTHER");
        assert_eq!(registry.client_count().await, 2);

        registry.shutdown().await;
        assert_eq!(registry.client_count().await, 0);
        assert_eq!(first.channel().state(), ChannelState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_is_not_cached() {
        let store = TestStore::new();
        let registry = registry(&store);
        let identity = registry.config().identity();

        let result = registry
            .get_or_create::<FakeService, _, _>(&identity, || async {
                Err(ClientError::ConnectionTimeout("127.0.0.1:50051".to_string()))
            })
            .await;
        assert!(matches!(result, Err(ClientError::ConnectionTimeout(_))));
        assert_eq!(registry.client_count().await, 0);

        let client = registry
            .get_or_create(&identity, || async { Ok(fake_service()) })
            .await
            .unwrap();
        let token = tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                match client.acquire_token().await {
                    Ok(token) => break token,
                    Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(token, "tok");

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connect_does_not_block_other_identities() {
        let store = TestStore::new();
        let registry = registry(&store);
        let stalled = registry.config().identity();
        let other = ClientIdentity {
            installation_code: "OTHER".to_string(),
            ..stalled.clone()
        };

        let blocked = registry.get_or_create::<FakeService, _, _>(&stalled, std::future::pending);
        tokio::pin!(blocked);
        assert!(futures::poll!(blocked.as_mut()).is_pending());

        let client = tokio::time::timeout(
            Duration::from_secs(1),
            registry.get_or_create(&other, || async { Ok(fake_service()) }),
        )
        .await
        .expect("connect for another identity was blocked")
        .unwrap();

        assert_eq!(client.channel().installation_code(), "OTHER");
        assert_eq!(registry.client_count().await, 1);
        assert!(futures::poll!(blocked.as_mut()).is_pending());

        registry.shutdown().await;
    }

    #[test]
    fn test_from_config_rejects_invalid_config() {
        let result = ClientRegistry::from_config(GatekeeperConfig::default());
        assert!(matches!(result, Err(ClientError::InvalidConfiguration(_))));
    }
}
