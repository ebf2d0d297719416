// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Bearer token slot shared between the control channel and request paths.
//!
//! The empty string means "no token". Waiters park on a watch channel and are
//! released by the next non-empty `set`, or by their own timeout.

use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct TokenGate {
    token: watch::Sender<String>,
}

impl TokenGate {
    pub fn new() -> Self {
        let (token, _) = watch::channel(String::new());
        Self { token }
    }

    /// Replace the token and wake every waiter. An empty value clears it.
    pub fn set(&self, token: impl Into<String>) {
        self.token.send_replace(token.into());
    }

    pub fn current(&self) -> String {
        self.token.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.token.subscribe()
    }

    /// Return the token as soon as it is non-empty, or whatever is current
    /// (possibly empty) once `timeout` elapses.
    pub async fn wait(&self, timeout: Duration) -> String {
        let mut receiver = self.token.subscribe();
        let token = match tokio::time::timeout(timeout, receiver.wait_for(|token| !token.is_empty())).await {
            Ok(Ok(token)) => token.clone(),
            _ => self.current(),
        };
        token
    }
}

impl Default for TokenGate {
    fn default() -> Self {
        Self::new()
    }
}
