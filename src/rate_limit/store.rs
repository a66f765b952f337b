// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Counter store used by the rate limiter.
//!
//! The store must apply a batch of increments (each with its expiry) as a
//! single unit; the limiter does no locking of its own. [`InMemoryCounterStore`]
//! satisfies this with one mutex around an LRU-bounded map, which keeps
//! memory flat when many distinct identities are seen.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};

use super::clock::{Clock, SystemClock};

/// Default number of tracked keys per map.
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Hard block layered on top of window counting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Epoch milliseconds at which the block lifts.
    pub until: u64,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CounterStoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("counter store returned {got} results for {expected} keys")]
    ShortBatch { expected: usize, got: usize },
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment every key by one and (re)set its expiry to `ttl_ms`, as one
    /// unit. Returns the new counts in key order.
    async fn incr_with_expiry(
        &self,
        keys: &[String],
        ttl_ms: u64,
    ) -> Result<Vec<u64>, CounterStoreError>;

    /// First unexpired block among `keys`.
    async fn get_block(&self, keys: &[String]) -> Result<Option<BlockRecord>, CounterStoreError>;

    /// Record `block` under every key; it expires at `block.until`.
    async fn set_block(&self, keys: &[String], block: &BlockRecord)
        -> Result<(), CounterStoreError>;
}

// =============================================================================
// InMemoryCounterStore
// =============================================================================

struct Counter {
    count: u64,
    expires_at: u64,
}

struct Maps {
    counters: LruCache<String, Counter>,
    blocks: LruCache<String, BlockRecord>,
}

/// Process-local counter store.
pub struct InMemoryCounterStore {
    maps: Mutex<Maps>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Arc::new(SystemClock))
    }
}

impl InMemoryCounterStore {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            maps: Mutex::new(Maps {
                counters: LruCache::new(capacity),
                blocks: LruCache::new(capacity),
            }),
            clock,
        }
    }

    fn maps(&self) -> Result<MutexGuard<'_, Maps>, CounterStoreError> {
        self.maps
            .lock()
            .map_err(|_| CounterStoreError::Unavailable("counter map poisoned".to_string()))
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr_with_expiry(
        &self,
        keys: &[String],
        ttl_ms: u64,
    ) -> Result<Vec<u64>, CounterStoreError> {
        let now = self.clock.now_ms();
        let expires_at = now.saturating_add(ttl_ms);
        let mut maps = self.maps()?;

        let counts = keys
            .iter()
            .map(|key| match maps.counters.get_mut(key) {
                Some(counter) if counter.expires_at > now => {
                    counter.count = counter.count.saturating_add(1);
                    counter.expires_at = expires_at;
                    counter.count
                }
                _ => {
                    maps.counters.put(
                        key.clone(),
                        Counter {
                            count: 1,
                            expires_at,
                        },
                    );
                    1
                }
            })
            .collect();
        Ok(counts)
    }

    async fn get_block(&self, keys: &[String]) -> Result<Option<BlockRecord>, CounterStoreError> {
        let now = self.clock.now_ms();
        let mut maps = self.maps()?;

        for key in keys {
            match maps.blocks.get(key) {
                Some(block) if block.until > now => return Ok(Some(block.clone())),
                Some(_) => {
                    maps.blocks.pop(key);
                }
                None => {}
            }
        }
        Ok(None)
    }

    async fn set_block(
        &self,
        keys: &[String],
        block: &BlockRecord,
    ) -> Result<(), CounterStoreError> {
        let mut maps = self.maps()?;
        for key in keys {
            maps.blocks.put(key.clone(), block.clone());
        }
        Ok(())
    }
}
