// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Policy Decision Cache
//!
//! Unbounded map from a request or response fingerprint to the policy the
//! service returned for it. The service toggles caching at runtime through
//! the control channel; while disabled, `put`, `get` and `clear` do nothing.
//! `UNKNOWN` is never cached.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Purpose:** Skip remote calls for repeated identical requests

use crate::proto::FirewallPolicy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;

pub struct PolicyDecisionCache<K> {
    inner: Mutex<CacheState<K>>,
}

struct CacheState<K> {
    enabled: bool,
    entries: HashMap<K, FirewallPolicy>,
}

impl<K: Eq + Hash> PolicyDecisionCache<K> {
    pub fn new(enabled: bool) -> Self {
        Self {
            inner: Mutex::new(CacheState {
                enabled,
                entries: HashMap::new(),
            }),
        }
    }

    pub fn put(&self, key: K, policy: FirewallPolicy) {
        if policy == FirewallPolicy::Unknown {
            return;
        }
        let mut state = self.inner.lock();
        if state.enabled {
            state.entries.insert(key, policy);
        }
    }

    pub fn get(&self, key: &K) -> Option<FirewallPolicy> {
        let state = self.inner.lock();
        if !state.enabled {
            return None;
        }
        state.entries.get(key).copied()
    }

    /// Drop all entries; does nothing while disabled.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        if state.enabled {
            state.entries.clear();
        }
    }

    /// Drop all entries regardless of the enabled flag.
    pub fn purge(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.lock().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash> Default for PolicyDecisionCache<K> {
    fn default() -> Self {
        Self::new(false)
    }
}
