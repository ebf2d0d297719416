// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Connection Info Cache
//!
//! Bounded LRU map from [`ConnectionKey`] to the enrichment the policy service
//! returned when the connection was admitted. The proxy looks the entry up
//! again for every request and response travelling over that connection.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Purpose:** Avoid re-querying connection metadata per request

use crate::domain::connection::{ConnectionInfo, ConnectionKey};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

pub const DEFAULT_CONNECTION_CACHE_CAPACITY: usize = 1024;

pub struct ConnectionInfoCache {
    entries: Mutex<LruCache<ConnectionKey, ConnectionInfo>>,
}

impl ConnectionInfoCache {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Insert or refresh `key`, evicting the least recently used entry when full.
    pub fn put(&self, key: ConnectionKey, info: ConnectionInfo) {
        self.entries.lock().put(key, info);
    }

    /// Lookup that also marks `key` as most recently used
    pub fn get(&self, key: &ConnectionKey) -> Option<ConnectionInfo> {
        self.entries.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &ConnectionKey) -> Option<ConnectionInfo> {
        self.entries.lock().pop(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

impl Default for ConnectionInfoCache {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_CACHE_CAPACITY)
    }
}
