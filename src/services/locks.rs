// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-key async mutexes that are dropped once nobody holds or waits on them.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Map of per-key locks.
#[derive(Clone)]
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    inner: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }
}

/// Held lock for one key. Dropping it releases the lock and prunes the entry
/// when no other task references it.
pub struct KeyedGuard<K: Eq + Hash + Clone> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, key: &K) -> Arc<Mutex<()>> {
        self.inner
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for the lock on `key`.
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let guard = self.mutex_for(&key).lock_owned().await;
        KeyedGuard {
            key,
            guard: Some(guard),
            locks: self.inner.clone(),
        }
    }

    /// Take the lock on `key` only if it is free right now.
    pub fn try_lock(&self, key: K) -> Option<KeyedGuard<K>> {
        let mutex = self.mutex_for(&key);
        match mutex.try_lock_owned() {
            Ok(guard) => Some(KeyedGuard {
                key,
                guard: Some(guard),
                locks: self.inner.clone(),
            }),
            Err(_) => {
                self.prune(&key);
                None
            }
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn prune(&self, key: &K) {
        prune(&self.inner, key);
    }
}

fn prune<K: Eq + Hash>(locks: &DashMap<K, Arc<Mutex<()>>>, key: &K) {
    // Only the map's own reference left: no holder, no waiter.
    locks.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        self.guard.take();
        prune(&self.locks, &self.key);
    }
}
