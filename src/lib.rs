//! Single-flight cache fills coordinated by short-lived distributed leases.
//!
//! When many callers miss the cache on the same key at once, only one of
//! them (the leader, elected through an atomic lease) runs the expensive
//! fetch; the rest poll the cache for a bounded time and either pick up the
//! leader's value or fall back to fetching on their own.
//!
//! ```no_run
//! use cache_lease::{CacheLease, CallOptions, MemoryAdapter};
//!
//! # async fn demo() -> Result<(), cache_lease::Error> {
//! let flight = CacheLease::<String>::new(MemoryAdapter::new())?
//!     .with_cache_ttl(std::time::Duration::from_secs(60));
//!
//! let res = flight
//!     .get_or_set(
//!         "user:42",
//!         |_ctx| async { Ok::<_, cache_lease::BoxError>("expensive value".to_string()) },
//!         CallOptions::default(),
//!     )
//!     .await?;
//!
//! println!("{} via {}", res.value, res.meta.outcome);
//! # Ok(())
//! # }
//! ```
//!
//! The cache and lease stores are trait boundaries ([`Cache`], [`Leases`]);
//! any backend with an atomic conditional write can host the lease. The
//! bundled [`MemoryAdapter`] covers single-process use and tests.

pub mod backend;
pub mod clock;
pub mod error;
pub mod hooks;
pub mod memory;
pub mod options;
pub mod phase;
pub mod runtime;
pub mod wait;

pub use backend::{ttl_to_secs, Acquired, Cache, Leases, ReadyState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AdapterError, BoxError, Error, ErrorKind};
pub use hooks::{FallbackInfo, FollowerWaitInfo, HitInfo, Hooks, LeaderInfo, WaitOutcome};
pub use memory::{MemoryAdapter, MemoryCache, MemoryLeases};
pub use options::{
    AdapterDescriptor, AdapterSpec, CacheLease, CallOptions, ShouldCache, DEFAULT_LEASE_TTL,
    DEFAULT_WAIT_MAX, DEFAULT_WAIT_STEP,
};
pub use phase::Phase;
pub use runtime::{FetchContext, FlightResult, Meta, Outcome};
pub use wait::{ExponentialWait, FixedWait, WaitContext, WaitStrategy};
