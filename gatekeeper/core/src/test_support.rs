// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! In-memory transports and fixtures shared by unit tests.

use crate::application::token_gate::TokenGate;
use crate::domain::transport::{ControlTransport, DecisionTransport, ServerMessageStream};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::named_mutex::NamedMutex;
use crate::proto::appguard_commands::{
    AuthorizationRejected, DeviceAuthorized, DeviceDeauthorized, FirewallDefaults,
};
use crate::proto::{
    server_message, AppGuardHttpRequest, AppGuardHttpResponse, AppGuardResponse,
    AppGuardTcpConnection, AppGuardTcpInfo, AppGuardTcpResponse, ClientMessage, FirewallPolicy,
    ServerMessage,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tonic::Status;

/// Credential store in a temporary directory with a unique lock name
pub struct TestStore {
    pub store: Arc<CredentialStore>,
    lock_name: String,
    _dir: TempDir,
}

impl TestStore {
    pub fn new() -> Self {
        Self::open_at(|dir| dir.join("credentials.conf"))
    }

    /// Store whose parent directory is shadowed by a regular file: it opens
    /// empty, but every write fails.
    pub fn unwritable() -> Self {
        let fixture = Self::open_at(|dir| dir.join("state").join("credentials.conf"));
        std::fs::write(fixture._dir.path().join("state"), "not a directory").unwrap();
        fixture
    }

    fn open_at(path: impl FnOnce(&Path) -> PathBuf) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let lock_name = format!("/gatekeeper-test-{}", uuid::Uuid::new_v4().simple());
        let store = CredentialStore::open(path(dir.path()), &lock_name).unwrap();
        Self {
            store: Arc::new(store),
            lock_name,
            _dir: dir,
        }
    }
}

impl Drop for TestStore {
    fn drop(&mut self) {
        let _ = NamedMutex::unlink(&self.lock_name);
    }
}

/// One scripted control stream
pub enum Session {
    /// `open_control_channel` fails with this status
    Refuse(Status),
    /// Emit the messages, then optionally end with a status or OK
    Stream {
        messages: Vec<ServerMessage>,
        end: SessionTail,
    },
}

pub enum SessionTail {
    HoldOpen,
    Close,
    Fail(Status),
}

impl Session {
    pub fn open(messages: Vec<ServerMessage>) -> Self {
        Session::Stream {
            messages,
            end: SessionTail::HoldOpen,
        }
    }

    pub fn closing(messages: Vec<ServerMessage>) -> Self {
        Session::Stream {
            messages,
            end: SessionTail::Close,
        }
    }

    pub fn failing(messages: Vec<ServerMessage>, status: Status) -> Self {
        Session::Stream {
            messages,
            end: SessionTail::Fail(status),
        }
    }
}

/// Control transport replaying one [`Session`] per open. Once the script is
/// exhausted further streams stay open without emitting anything. Every item
/// is preceded by a yield so observers of the token and state channels see
/// each step.
pub struct ScriptedControlTransport {
    sessions: Mutex<VecDeque<Session>>,
    opens: Mutex<Vec<Instant>>,
    sent: Arc<watch::Sender<Vec<ClientMessage>>>,
}

impl ScriptedControlTransport {
    pub fn new(sessions: Vec<Session>) -> Self {
        let (sent, _) = watch::channel(Vec::new());
        Self {
            sessions: Mutex::new(sessions.into()),
            opens: Mutex::new(Vec::new()),
            sent: Arc::new(sent),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().clone()
    }

    /// Wait until at least `count` client messages were delivered.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<ClientMessage> {
        let mut sent = self.sent.subscribe();
        let messages = tokio::time::timeout(Duration::from_secs(60), sent.wait_for(|m| m.len() >= count))
            .await
            .expect("client messages not delivered")
            .expect("recorder closed")
            .clone();
        messages
    }
}

#[async_trait]
impl ControlTransport for ScriptedControlTransport {
    async fn open_control_channel(
        &self,
        mut outbound: mpsc::Receiver<ClientMessage>,
    ) -> Result<ServerMessageStream, Status> {
        self.opens.lock().push(Instant::now());

        let sent = self.sent.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                sent.send_modify(|messages| messages.push(message));
            }
        });

        let session = self.sessions.lock().pop_front();
        match session {
            None => Ok(stream::pending().boxed()),
            Some(Session::Refuse(status)) => Err(status),
            Some(Session::Stream { messages, end }) => {
                let head = stream::iter(messages).then(|message| async move {
                    tokio::task::yield_now().await;
                    Ok::<_, Status>(message)
                });
                Ok(match end {
                    SessionTail::HoldOpen => head.chain(stream::pending()).boxed(),
                    SessionTail::Close => head.boxed(),
                    SessionTail::Fail(status) => head
                        .chain(stream::once(async move {
                            tokio::task::yield_now().await;
                            Err(status)
                        }))
                        .boxed(),
                })
            }
        }
    }
}

/// Every value the gate takes from now on, in order.
pub fn record_tokens(gate: &TokenGate) -> watch::Receiver<Vec<String>> {
    let (seen, recorded) = watch::channel(Vec::new());
    let mut tokens = gate.subscribe();
    tokio::spawn(async move {
        while tokens.changed().await.is_ok() {
            let token = tokens.borrow_and_update().clone();
            seen.send_modify(|seen| seen.push(token));
        }
    });
    recorded
}

fn push(message: server_message::Message) -> ServerMessage {
    ServerMessage {
        message: Some(message),
    }
}

pub fn authorized(credential: Option<(&str, &str)>) -> ServerMessage {
    push(server_message::Message::DeviceAuthorized(DeviceAuthorized {
        app_id: credential.map(|(id, _)| id.to_string()),
        app_secret: credential.map(|(_, secret)| secret.to_string()),
    }))
}

pub fn rejected() -> ServerMessage {
    push(server_message::Message::AuthorizationRejected(
        AuthorizationRejected {},
    ))
}

pub fn token_update(token: &str) -> ServerMessage {
    push(server_message::Message::UpdateTokenCommand(token.to_string()))
}

pub fn deauthorized() -> ServerMessage {
    push(server_message::Message::DeviceDeauthorized(DeviceDeauthorized {}))
}

pub fn firewall_defaults(cache: bool) -> ServerMessage {
    push(server_message::Message::SetFirewallDefaults(FirewallDefaults { cache }))
}

/// Decision transport answering every call with a fixed policy
pub struct CountingDecisionTransport {
    policy: Mutex<FirewallPolicy>,
    failure: Mutex<Option<Status>>,
    pub tcp_calls: AtomicUsize,
    pub request_calls: AtomicUsize,
    pub response_calls: AtomicUsize,
    tokens: Mutex<Vec<String>>,
}

impl CountingDecisionTransport {
    pub fn new(policy: FirewallPolicy) -> Self {
        Self {
            policy: Mutex::new(policy),
            failure: Mutex::new(None),
            tcp_calls: AtomicUsize::new(0),
            request_calls: AtomicUsize::new(0),
            response_calls: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn set_policy(&self, policy: FirewallPolicy) {
        *self.policy.lock() = policy;
    }

    pub fn fail_with(&self, status: Status) {
        *self.failure.lock() = Some(status);
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }

    fn answer(&self, token: String) -> Result<AppGuardResponse, Status> {
        self.tokens.lock().push(token);
        if let Some(status) = self.failure.lock().clone() {
            return Err(status);
        }
        Ok(AppGuardResponse {
            policy: *self.policy.lock() as i32,
        })
    }
}

#[async_trait]
impl DecisionTransport for CountingDecisionTransport {
    async fn handle_tcp_connection(
        &self,
        connection: AppGuardTcpConnection,
    ) -> Result<AppGuardTcpResponse, Status> {
        self.tcp_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().push(connection.token.clone());
        if let Some(status) = self.failure.lock().clone() {
            return Err(status);
        }
        let tcp_id = self.tcp_calls.load(Ordering::SeqCst) as u64;
        Ok(AppGuardTcpResponse {
            tcp_info: Some(AppGuardTcpInfo {
                connection: Some(AppGuardTcpConnection {
                    token: String::new(),
                    ..connection
                }),
                ip_info: None,
                tcp_id,
            }),
        })
    }

    async fn handle_http_request(
        &self,
        request: AppGuardHttpRequest,
    ) -> Result<AppGuardResponse, Status> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(request.token)
    }

    async fn handle_http_response(
        &self,
        response: AppGuardHttpResponse,
    ) -> Result<AppGuardResponse, Status> {
        self.response_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(response.token)
    }
}
