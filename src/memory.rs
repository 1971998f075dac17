//! In-process adapter pair. Useful on its own for single-process callers,
//! and as the backend behind the `memory` descriptor and the test suite.

use crate::backend::{Acquired, Cache, Leases, ReadyState};
use crate::clock::{Clock, SystemClock};
use crate::error::AdapterError;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

struct CacheEntry {
    value: Bytes,
    expires_at: Option<i64>,
}

impl CacheEntry {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Cache storage on a concurrent map, with expiry driven by the injected
/// clock so tests can advance time explicitly.
pub struct MemoryCache {
    clock: Arc<dyn Clock>,
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: DashMap::new(),
        }
    }
}

#[async_trait::async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, AdapterError> {
        let now = self.clock.now_millis();
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                drop(entry);
                self.entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), AdapterError> {
        let expires_at = ttl.map(|ttl| self.clock.now_millis() + ttl.as_millis() as i64);
        self.entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }
}

struct LeaseRecord {
    owner: String,
    expires_at: i64,
    ready: bool,
}

impl LeaseRecord {
    fn is_active(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

/// Lease storage on a concurrent map. The entry API gives the acquire path
/// its compare-and-set atomicity within the process.
pub struct MemoryLeases {
    clock: Arc<dyn Clock>,
    records: DashMap<String, LeaseRecord>,
}

impl MemoryLeases {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: DashMap::new(),
        }
    }
}

#[async_trait::async_trait]
impl Leases for MemoryLeases {
    async fn acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<Acquired, AdapterError> {
        let now = self.clock.now_millis();
        let lease_until = now + ttl.as_millis() as i64;

        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_active(now) {
                    log::debug!(
                        "{}.acquire({}) => follower of {}",
                        key,
                        owner,
                        occupied.get().owner
                    );
                    Ok(Acquired::Follower {
                        lease_until: occupied.get().expires_at,
                    })
                } else {
                    occupied.insert(LeaseRecord {
                        owner: owner.to_string(),
                        expires_at: lease_until,
                        ready: false,
                    });
                    log::debug!("{}.acquire({}) => leader (took expired)", key, owner);
                    Ok(Acquired::Leader { lease_until })
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LeaseRecord {
                    owner: owner.to_string(),
                    expires_at: lease_until,
                    ready: false,
                });
                log::debug!("{}.acquire({}) => leader", key, owner);
                Ok(Acquired::Leader { lease_until })
            }
        }
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), AdapterError> {
        self.records.remove_if(key, |_, record| record.owner == owner);
        Ok(())
    }

    async fn mark_ready(&self, key: &str) -> Result<(), AdapterError> {
        let now = self.clock.now_millis();
        if let Some(mut record) = self.records.get_mut(key) {
            if record.is_active(now) {
                record.ready = true;
            }
        }
        Ok(())
    }

    async fn is_ready(&self, key: &str) -> Result<Option<ReadyState>, AdapterError> {
        let now = self.clock.now_millis();
        let state = match self.records.get(key) {
            Some(record) if record.is_active(now) => ReadyState {
                ready: record.ready,
                expired: false,
            },
            _ => ReadyState {
                ready: false,
                expired: true,
            },
        };
        Ok(Some(state))
    }
}

/// Cache and lease pair sharing one clock.
#[derive(Clone)]
pub struct MemoryAdapter {
    cache: Arc<MemoryCache>,
    leases: Arc<MemoryLeases>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: Arc::new(MemoryCache::new(clock.clone())),
            leases: Arc::new(MemoryLeases::new(clock)),
        }
    }

    pub fn cache(&self) -> Arc<MemoryCache> {
        self.cache.clone()
    }

    pub fn leases(&self) -> Arc<MemoryLeases> {
        self.leases.clone()
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}
