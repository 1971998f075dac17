use crate::error::AdapterError;
use bytes::Bytes;
use std::time::Duration;

/// Result of an atomic lease acquisition. `lease_until` is the expiry of
/// the current holder in epoch milliseconds: for a leader its own, for a
/// follower the incumbent's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Leader { lease_until: i64 },
    Follower { lease_until: i64 },
}

impl Acquired {
    pub fn lease_until(&self) -> i64 {
        match self {
            Acquired::Leader { lease_until } | Acquired::Follower { lease_until } => *lease_until,
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Acquired::Leader { .. })
    }
}

/// Readiness of the active lease record. `ready` is only meaningful while
/// `expired` is false; an expired or missing record reports `expired: true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyState {
    pub ready: bool,
    pub expired: bool,
}

/// Byte-level cache storage. The runtime layers its value codec on top and
/// only ever observes presence or absence.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    /// Fetch the payload for `key`. Missing and expired entries both read
    /// as `None`; a stale value must never be returned.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, AdapterError>;

    /// Store the payload for `key`. `ttl: None` stores without expiry and
    /// clears any expiry left by a previous write.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), AdapterError>;
}

/// Single-holder lease storage. `acquire` must be an atomic compare-and-set
/// and `release` an owner-checked compare-and-delete; those two properties
/// are what the whole coordination scheme rests on.
#[async_trait::async_trait]
pub trait Leases: Send + Sync {
    /// Create the lease record for `key` if no active record exists and
    /// report `Leader`; otherwise report `Follower` with the incumbent's
    /// expiry. Expired records count as absent.
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration)
        -> Result<Acquired, AdapterError>;

    /// Delete the record for `key` only if it is still owned by `owner`.
    /// No-op otherwise.
    async fn release(&self, key: &str, owner: &str) -> Result<(), AdapterError>;

    /// Flag the active record as ready so followers can stop waiting before
    /// the lease expires. Backends without the capability keep the no-op
    /// default.
    async fn mark_ready(&self, _key: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Read the readiness of the record for `key`. `None` means the backend
    /// does not support readiness and followers fall back to polling the
    /// cache alone.
    async fn is_ready(&self, _key: &str) -> Result<Option<ReadyState>, AdapterError> {
        Ok(None)
    }
}

/// Millisecond-to-second TTL conversion for backends with second
/// granularity: rounds up, and never rounds a positive sub-second TTL down
/// to zero. Backend-specific floors (some KV stores require 60s) stay in
/// the adapter.
pub fn ttl_to_secs(ttl: Duration) -> u64 {
    let millis = ttl.as_millis();
    ((millis + 999) / 1000) as u64
}
