// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Control Channel Client
//!
//! Owns the long-lived bidirectional stream to the policy service for one
//! installation code. A background task drives the stream through these
//! states:
//!
//! ```text
//! Connecting -> Authorizing -> Authenticating -> Streaming
//!      ^                                             |
//!      |------------- clean end of stream -----------|
//!      |                                             |
//!      +---- Backoff <---- stream error -------------+
//!
//! any state -> Stopped   (stop(), rejection, deauthorization,
//!                         missing or unpersistable credentials)
//! ```
//!
//! While `Streaming` the task applies server pushes: token rotation into the
//! [`TokenGate`], deauthorization (credential wipe, then stop) and firewall
//! defaults (decision cache purge and toggle).
//!
//! A failed stream clears the token once and waits `reconnect_backoff` before
//! the next attempt. Cancellation is cooperative: `stop()` clears the running
//! flag, cancels the in-flight attempt and joins the task.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Purpose:** Device authorization and server push handling

use crate::application::policy_cache::PolicyDecisionCache;
use crate::application::token_gate::TokenGate;
use crate::domain::credentials::{Credential, DeviceIdentity, CLIENT_CATEGORY, CLIENT_TYPE};
use crate::domain::error::{ClientError, StorageError};
use crate::domain::fingerprint::RequestFingerprint;
use crate::domain::transport::{ControlTransport, ServerMessageStream};
use crate::infrastructure::credential_store::CredentialStore;
use crate::proto::appguard_commands::{AuthorizationRequest, Authentication, FirewallDefaults};
use crate::proto::{client_message, server_message, ClientMessage, ServerMessage};
use futures::StreamExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, error, info, warn};

const OUTBOUND_BUFFER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Authorizing,
    Authenticating,
    Streaming,
    Backoff,
    Stopped,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Authorizing => "authorizing",
            ChannelState::Authenticating => "authenticating",
            ChannelState::Streaming => "streaming",
            ChannelState::Backoff => "backoff",
            ChannelState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a channel reached [`ChannelState::Stopped`]
#[derive(Debug, Clone)]
pub enum StopReason {
    /// `stop()` was called or the client was dropped
    Requested,
    AuthorizationRejected,
    Deauthorized,
    /// Authorized, but no credentials are stored for the installation code
    MissingCredentials,
    /// Persisting or reloading credentials, or sending them, failed
    Failed(ClientError),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => f.write_str("stop requested"),
            StopReason::AuthorizationRejected => f.write_str("authorization rejected"),
            StopReason::Deauthorized => f.write_str("device deauthorized"),
            StopReason::MissingCredentials => f.write_str("no credentials stored"),
            StopReason::Failed(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlChannelSettings {
    pub installation_code: String,
    pub device: DeviceIdentity,
    pub reconnect_backoff: Duration,
}

pub struct ControlChannelClient {
    shared: Arc<ChannelShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct ChannelShared {
    settings: ControlChannelSettings,
    transport: Arc<dyn ControlTransport>,
    store: Arc<CredentialStore>,
    token_gate: Arc<TokenGate>,
    policy_cache: Arc<PolicyDecisionCache<RequestFingerprint>>,
    running: AtomicBool,
    state: watch::Sender<ChannelState>,
    shutdown: CancellationToken,
    attempt: Mutex<Option<CancellationToken>>,
    stop_reason: Mutex<Option<StopReason>>,
}

enum SessionEnd {
    /// Server finished the stream with OK status
    Closed,
    Failed(Status),
    Terminal(StopReason),
}

enum Inbound {
    Message(ServerMessage),
    Closed,
    Failed(Status),
}

impl ControlChannelClient {
    /// Spawn the stream task. Must be called from within a tokio runtime.
    pub fn start(
        settings: ControlChannelSettings,
        transport: Arc<dyn ControlTransport>,
        store: Arc<CredentialStore>,
        token_gate: Arc<TokenGate>,
        policy_cache: Arc<PolicyDecisionCache<RequestFingerprint>>,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        let shared = Arc::new(ChannelShared {
            settings,
            transport,
            store,
            token_gate,
            policy_cache,
            running: AtomicBool::new(true),
            state,
            shutdown: CancellationToken::new(),
            attempt: Mutex::new(None),
            stop_reason: Mutex::new(None),
        });

        let task = tokio::spawn(shared.clone().run());

        Self {
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == ChannelState::Streaming
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn token_gate(&self) -> &Arc<TokenGate> {
        &self.shared.token_gate
    }

    pub fn installation_code(&self) -> &str {
        &self.shared.settings.installation_code
    }

    /// Set once the channel has stopped.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.shared.stop_reason.lock().clone()
    }

    /// The error that stopped the channel, if it stopped on a failure.
    pub fn terminal_error(&self) -> Option<ClientError> {
        match self.stop_reason()? {
            StopReason::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Stop the stream task and wait for it to exit.
    pub async fn stop(&self) {
        self.shared.request_stop();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Control channel task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ControlChannelClient {
    fn drop(&mut self) {
        self.shared.request_stop();
    }
}

impl ChannelShared {
    fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
        self.shutdown.cancel();
        if let Some(attempt) = self.attempt.lock().as_ref() {
            attempt.cancel();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_state(&self, state: ChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(
                installation_code = %self.settings.installation_code,
                "Control channel {} -> {}", previous, state
            );
        }
    }

    fn begin_attempt(&self) -> CancellationToken {
        let attempt = self.shutdown.child_token();
        *self.attempt.lock() = Some(attempt.clone());
        attempt
    }

    async fn run(self: Arc<Self>) {
        info!(
            installation_code = %self.settings.installation_code,
            "Control channel started"
        );

        while self.is_running() {
            let attempt = self.begin_attempt();

            match self.run_session(&attempt).await {
                SessionEnd::Terminal(reason) => {
                    error!(
                        installation_code = %self.settings.installation_code,
                        "Control channel stopped permanently: {}", reason
                    );
                    *self.stop_reason.lock() = Some(reason);
                    break;
                }
                _ if !self.is_running() => break,
                SessionEnd::Closed => {
                    debug!("Control stream closed by server, reconnecting");
                }
                SessionEnd::Failed(status) => {
                    warn!(
                        code = ?status.code(),
                        "Control stream failed: {}; retrying in {:?}",
                        status.message(),
                        self.settings.reconnect_backoff
                    );
                    self.token_gate.set(String::new());
                    metrics::counter!("gatekeeper_control_channel_reconnects_total").increment(1);
                    self.set_state(ChannelState::Backoff);

                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.reconnect_backoff) => {}
                        _ = self.shutdown.cancelled() => {}
                    }
                }
            }
        }

        self.running.store(false, Ordering::Release);
        *self.attempt.lock() = None;
        self.stop_reason.lock().get_or_insert(StopReason::Requested);
        self.set_state(ChannelState::Stopped);
        info!(
            installation_code = %self.settings.installation_code,
            "Control channel stopped"
        );
    }

    async fn run_session(&self, attempt: &CancellationToken) -> SessionEnd {
        self.set_state(ChannelState::Connecting);

        let (outbound, receiver) = mpsc::channel(OUTBOUND_BUFFER);
        let opened = tokio::select! {
            _ = attempt.cancelled() => return SessionEnd::Failed(Status::cancelled("control channel stopped")),
            opened = self.transport.open_control_channel(receiver) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(status) => return SessionEnd::Failed(status),
        };

        self.set_state(ChannelState::Authorizing);
        if outbound.send(self.authorization_request()).await.is_err() {
            return SessionEnd::Failed(Status::unavailable(
                "control stream closed before authorization",
            ));
        }

        if let Some(end) = self.await_authorization(&mut stream, attempt).await {
            return end;
        }

        self.set_state(ChannelState::Authenticating);
        let credential = match self.load_credential().await {
            Ok(Some(credential)) => credential,
            Ok(None) => return SessionEnd::Terminal(StopReason::MissingCredentials),
            Err(e) => {
                return SessionEnd::Terminal(StopReason::Failed(
                    ClientError::StorageOperationFailure(e),
                ))
            }
        };

        let authentication = ClientMessage {
            message: Some(client_message::Message::Authentication(Authentication {
                app_id: credential.app_id,
                app_secret: credential.app_secret,
            })),
        };
        if outbound.send(authentication).await.is_err() {
            return SessionEnd::Terminal(StopReason::Failed(ClientError::Transport(
                Status::unavailable("control stream closed before authentication"),
            )));
        }

        self.set_state(ChannelState::Streaming);
        info!(
            installation_code = %self.settings.installation_code,
            "Control channel authenticated"
        );

        loop {
            match next_inbound(&mut stream, attempt).await {
                Inbound::Message(message) => {
                    if let Some(end) = self.apply_push(message).await {
                        return end;
                    }
                }
                Inbound::Closed => return SessionEnd::Closed,
                Inbound::Failed(status) => return SessionEnd::Failed(status),
            }
        }
    }

    /// `None` once the device is authorized.
    async fn await_authorization(
        &self,
        stream: &mut ServerMessageStream,
        attempt: &CancellationToken,
    ) -> Option<SessionEnd> {
        loop {
            let message = match next_inbound(stream, attempt).await {
                Inbound::Message(message) => message,
                Inbound::Closed => {
                    return Some(SessionEnd::Failed(Status::unavailable(
                        "control stream ended during authorization",
                    )))
                }
                Inbound::Failed(status) => return Some(SessionEnd::Failed(status)),
            };

            match message.message {
                Some(server_message::Message::DeviceAuthorized(authorized)) => {
                    match (authorized.app_id, authorized.app_secret) {
                        (Some(app_id), Some(app_secret)) => {
                            let credential = Credential::new(app_id, app_secret);
                            if let Err(e) = self.persist_credential(credential).await {
                                return Some(SessionEnd::Terminal(StopReason::Failed(
                                    ClientError::CredentialPersistFailure(e),
                                )));
                            }
                            info!("Device authorized; stored issued credentials");
                        }
                        (None, None) => debug!("Device authorized; using stored credentials"),
                        _ => warn!("Device authorized with partial credentials; ignoring them"),
                    }
                    return None;
                }
                Some(server_message::Message::AuthorizationRejected(_)) => {
                    return Some(SessionEnd::Terminal(StopReason::AuthorizationRejected));
                }
                _ => debug!("Ignoring control message received before authorization"),
            }
        }
    }

    /// `Some` when the push ends the session.
    async fn apply_push(&self, message: ServerMessage) -> Option<SessionEnd> {
        match message.message {
            Some(server_message::Message::UpdateTokenCommand(token)) => {
                debug!("Received token update");
                self.token_gate.set(token);
                None
            }
            Some(server_message::Message::DeviceDeauthorized(_)) => {
                warn!(
                    installation_code = %self.settings.installation_code,
                    "Device deauthorized; wiping stored credentials"
                );
                if let Err(e) = self.clear_credentials().await {
                    warn!("Failed to wipe credential store: {}", e);
                }
                self.token_gate.set(String::new());
                Some(SessionEnd::Terminal(StopReason::Deauthorized))
            }
            Some(server_message::Message::SetFirewallDefaults(FirewallDefaults { cache })) => {
                info!(cache, "Applying firewall defaults");
                self.policy_cache.purge();
                self.policy_cache.set_enabled(cache);
                None
            }
            Some(server_message::Message::DeviceAuthorized(_))
            | Some(server_message::Message::AuthorizationRejected(_)) => {
                debug!("Ignoring authorization message on an established stream");
                None
            }
            None => None,
        }
    }

    fn authorization_request(&self) -> ClientMessage {
        ClientMessage {
            message: Some(client_message::Message::AuthorizationRequest(
                AuthorizationRequest {
                    code: self.settings.installation_code.clone(),
                    category: CLIENT_CATEGORY.to_string(),
                    r#type: CLIENT_TYPE.to_string(),
                    target_os: self.settings.device.target_os.clone(),
                    uuid: self.settings.device.uuid.clone(),
                },
            )),
        }
    }

    async fn persist_credential(&self, credential: Credential) -> Result<(), StorageError> {
        let store = self.store.clone();
        let code = self.settings.installation_code.clone();
        blocking(move || store.save_credential(&code, &credential)).await
    }

    async fn load_credential(&self) -> Result<Option<Credential>, StorageError> {
        let store = self.store.clone();
        let code = self.settings.installation_code.clone();
        blocking(move || {
            store.reload()?;
            Ok(store.load_credential(&code))
        })
        .await
    }

    async fn clear_credentials(&self) -> Result<(), StorageError> {
        let store = self.store.clone();
        blocking(move || store.clear()).await
    }
}

async fn next_inbound(stream: &mut ServerMessageStream, attempt: &CancellationToken) -> Inbound {
    tokio::select! {
        _ = attempt.cancelled() => Inbound::Failed(Status::cancelled("control channel stopped")),
        item = stream.next() => match item {
            Some(Ok(message)) => Inbound::Message(message),
            Some(Err(status)) => Inbound::Failed(status),
            None => Inbound::Closed,
        },
    }
}

// The store takes a process-wide file lock; keep it off the async workers.
async fn blocking<T, F>(operation: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(operation).await {
        Ok(result) => result,
        Err(e) => Err(StorageError::Lock {
            name: "credential-store".to_string(),
            reason: format!("storage task failed: {e}"),
        }),
    }
}
