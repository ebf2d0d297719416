// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::error::ClientError;
use crate::proto::FirewallPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Externally configured policy used whenever the policy service cannot
/// produce a definite answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum FallbackPolicy {
    Allow,
    #[default]
    Deny,
}

impl FallbackPolicy {
    /// Collapse a decision outcome into a definite policy.
    ///
    /// `UNKNOWN` and every error resolve to `self`.
    pub fn resolve(self, outcome: Result<FirewallPolicy, ClientError>) -> FirewallPolicy {
        match outcome {
            Ok(FirewallPolicy::Allow) => FirewallPolicy::Allow,
            Ok(FirewallPolicy::Deny) => FirewallPolicy::Deny,
            Ok(FirewallPolicy::Unknown) => self.into(),
            Err(err) => {
                tracing::debug!(error = %err, fallback = %self, "Applying fallback policy");
                self.into()
            }
        }
    }
}

impl FromStr for FallbackPolicy {
    type Err = std::convert::Infallible;

    /// Case-insensitive; anything other than "allow" is deny.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("allow") {
            Ok(FallbackPolicy::Allow)
        } else {
            Ok(FallbackPolicy::Deny)
        }
    }
}

impl From<String> for FallbackPolicy {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(policy) => policy,
            Err(never) => match never {},
        }
    }
}

impl From<FallbackPolicy> for FirewallPolicy {
    fn from(value: FallbackPolicy) -> Self {
        match value {
            FallbackPolicy::Allow => FirewallPolicy::Allow,
            FallbackPolicy::Deny => FirewallPolicy::Deny,
        }
    }
}

impl fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackPolicy::Allow => f.write_str("allow"),
            FallbackPolicy::Deny => f.write_str("deny"),
        }
    }
}
