use crate::backend::{Acquired, Leases};
use crate::clock::elapsed;
use crate::error::{BoxError, Error, ErrorKind};
use crate::hooks::{FallbackInfo, FollowerWaitInfo, HitInfo, HookChain, LeaderInfo, WaitOutcome};
use crate::options::{resolve, CacheLease, CallOptions, Resolved};
use crate::phase::{self, Phase};
use crate::wait::WaitContext;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Observable classification of a `get_or_set` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The cache had a value before any lease was tried.
    Hit,
    /// This call led: it fetched, cached and released.
    MissLeader,
    /// This call led and fetched, but the cache predicate declined.
    MissLeaderNocache,
    /// This call waited on another holder and found the cached value.
    MissFollowerHit,
    /// This call waited out its budget and fetched on its own.
    MissFollowerFallback,
}

impl Outcome {
    /// Stable string identifier, suitable for metrics and response headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Hit => "HIT",
            Outcome::MissLeader => "MISS-LEADER",
            Outcome::MissLeaderNocache => "MISS-LEADER-NOCACHE",
            Outcome::MissFollowerHit => "MISS-FOLLOWER-HIT",
            Outcome::MissFollowerFallback => "MISS-FOLLOWER-FALLBACK",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a call was resolved. `lease_until` is present exactly when a lease
/// took part in the call; `waited` is zero for a leader and the measured
/// poll-loop time for a follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    pub outcome: Outcome,
    pub lease_until: Option<i64>,
    pub waited: Option<Duration>,
}

#[derive(Debug)]
pub struct FlightResult<V> {
    pub value: V,
    pub meta: Meta,
}

/// Handed to the fetcher. `signal` is a child of the call's cancel token so
/// a cooperative fetcher can stop early.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub key: String,
    pub signal: Option<CancellationToken>,
}

impl<V> CacheLease<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    /// Resolve `key` to a value, coordinating with other callers through
    /// the lease store so at most one of them runs `fetcher`.
    ///
    /// On a cache miss the caller either becomes the leader (fetches,
    /// caches, releases) or a follower (polls the cache up to `wait_max`,
    /// then fetches on its own). The returned [`Meta`] says which.
    pub async fn get_or_set<F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        opts: CallOptions<V>,
    ) -> Result<FlightResult<V>, Error>
    where
        F: FnOnce(FetchContext) -> Fut + Send,
        Fut: Future<Output = Result<V, BoxError>> + Send,
    {
        if let Some(signal) = opts.signal.as_ref() {
            if signal.is_cancelled() {
                return Err(Error::aborted(key));
            }
        }

        let resolved = resolve(self, key, opts)?;

        match resolved.signal.clone() {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => Err(Error::aborted(key)),
                    res = self.drive(&resolved, fetcher) => res,
                }
            }
            None => self.drive(&resolved, fetcher).await,
        }
    }

    async fn drive<F, Fut>(&self, r: &Resolved<V>, fetcher: F) -> Result<FlightResult<V>, Error>
    where
        F: FnOnce(FetchContext) -> Fut + Send,
        Fut: Future<Output = Result<V, BoxError>> + Send,
    {
        let key = r.key.as_str();
        let hooks = HookChain::new(&self.hooks, &r.hooks);

        // A hit never touches the lease store.
        let probed =
            phase::run(Phase::CacheGet, key, Some(self.adapter), self.cache.get(key)).await?;
        if let Some(raw) = probed {
            let value = decode(key, &raw)?;
            phase::run(
                Phase::HooksOnHit,
                key,
                None,
                hooks.hit(&value, HitInfo { key: key.to_string() }),
            )
            .await?;
            log::debug!("{}.get_or_set() => HIT", key);
            return Ok(FlightResult {
                value,
                meta: Meta {
                    outcome: Outcome::Hit,
                    lease_until: None,
                    waited: None,
                },
            });
        }

        let acquired = phase::run(
            Phase::LeasesAcquire,
            key,
            Some(self.adapter),
            self.leases.acquire(key, &r.owner_id, r.lease_ttl),
        )
        .await?;

        match acquired {
            Acquired::Leader { lease_until } => self.lead(r, &hooks, fetcher, lease_until).await,
            Acquired::Follower { lease_until } => {
                self.follow(r, &hooks, fetcher, lease_until).await
            }
        }
    }

    async fn lead<F, Fut>(
        &self,
        r: &Resolved<V>,
        hooks: &HookChain<'_, V>,
        fetcher: F,
        lease_until: i64,
    ) -> Result<FlightResult<V>, Error>
    where
        F: FnOnce(FetchContext) -> Fut + Send,
        Fut: Future<Output = Result<V, BoxError>> + Send,
    {
        let key = r.key.as_str();
        let mut guard = LeaseGuard::new(self.leases.clone(), self.adapter, key, &r.owner_id);

        let led = self.lead_inner(r, fetcher).await;
        guard.release().await;
        let (value, cached) = led?;

        phase::run(
            Phase::HooksOnLeader,
            key,
            None,
            hooks.leader(
                &value,
                LeaderInfo {
                    key: key.to_string(),
                    lease_until,
                    cached,
                },
            ),
        )
        .await?;

        let outcome = if cached {
            Outcome::MissLeader
        } else {
            Outcome::MissLeaderNocache
        };
        log::debug!("{}.get_or_set() => {}", key, outcome);
        Ok(FlightResult {
            value,
            meta: Meta {
                outcome,
                lease_until: Some(lease_until),
                waited: Some(Duration::ZERO),
            },
        })
    }

    async fn lead_inner<F, Fut>(&self, r: &Resolved<V>, fetcher: F) -> Result<(V, bool), Error>
    where
        F: FnOnce(FetchContext) -> Fut + Send,
        Fut: Future<Output = Result<V, BoxError>> + Send,
    {
        let key = r.key.as_str();
        let ctx = FetchContext {
            key: key.to_string(),
            signal: r.signal.as_ref().map(|s| s.child_token()),
        };
        let value = phase::run(Phase::Fetcher, key, None, fetcher(ctx)).await?;

        let cached = r.should_cache.as_ref().map_or(true, |p| p(&value));
        if cached {
            let payload = encode(key, &value)?;
            phase::run(
                Phase::CacheSet,
                key,
                Some(self.adapter),
                self.cache.set(key, payload, r.cache_ttl),
            )
            .await?;
        }

        // Readiness lets followers stop waiting even when nothing was
        // cached; backends without the capability make this a no-op.
        phase::run(
            Phase::LeasesMarkReady,
            key,
            Some(self.adapter),
            self.leases.mark_ready(key),
        )
        .await?;

        Ok((value, cached))
    }

    async fn follow<F, Fut>(
        &self,
        r: &Resolved<V>,
        hooks: &HookChain<'_, V>,
        fetcher: F,
        lease_until: i64,
    ) -> Result<FlightResult<V>, Error>
    where
        F: FnOnce(FetchContext) -> Fut + Send,
        Fut: Future<Output = Result<V, BoxError>> + Send,
    {
        let key = r.key.as_str();
        let start = self.clock.now_millis();
        let mut attempt: u32 = 0;
        let mut found: Option<Bytes> = None;

        if !r.wait_max.is_zero() {
            loop {
                let read =
                    phase::run(Phase::CacheGet, key, Some(self.adapter), self.cache.get(key))
                        .await?;
                if let Some(raw) = read {
                    found = Some(raw);
                    break;
                }

                let ready = phase::run(
                    Phase::LeasesIsReady,
                    key,
                    Some(self.adapter),
                    self.leases.is_ready(key),
                )
                .await?;
                if let Some(state) = ready {
                    // Ready or gone: the leader finished without caching,
                    // or its lease died. Either way polling is pointless.
                    if state.ready || state.expired {
                        log::debug!(
                            "{}.wait({}) => ready={} expired={}",
                            key,
                            r.owner_id,
                            state.ready,
                            state.expired
                        );
                        break;
                    }
                }

                let spent = elapsed(start, self.clock.now_millis());
                let remaining = r.wait_max.saturating_sub(spent);
                if remaining.is_zero() {
                    break;
                }

                let ctx = WaitContext {
                    attempt,
                    elapsed: spent,
                    remaining,
                    wait_max: r.wait_max,
                    wait_step: r.wait_step,
                };
                let strategy = r.wait_strategy.clone();
                let delay = phase::run(Phase::WaitStrategy, key, None, async move {
                    strategy.next_delay(&ctx)
                })
                .await?;
                let delay = delay.min(remaining);

                attempt += 1;
                phase::run(Phase::WaitSleep, key, None, async {
                    self.clock.sleep(delay).await;
                    Ok::<(), BoxError>(())
                })
                .await?;
            }
        }

        // One more read covers the race between the last poll and the
        // leader's cache write.
        if found.is_none() {
            found = phase::run(Phase::CacheGet, key, Some(self.adapter), self.cache.get(key))
                .await?;
        }

        let waited = elapsed(start, self.clock.now_millis());
        let wait_outcome = if found.is_some() {
            WaitOutcome::Hit
        } else {
            WaitOutcome::Fallback
        };
        phase::run(
            Phase::HooksOnFollowerWait,
            key,
            None,
            hooks.follower_wait(FollowerWaitInfo {
                key: key.to_string(),
                lease_until,
                waited,
                outcome: wait_outcome,
            }),
        )
        .await?;

        match found {
            Some(raw) => {
                let value = decode(key, &raw)?;
                log::debug!("{}.get_or_set() => MISS-FOLLOWER-HIT after {:?}", key, waited);
                Ok(FlightResult {
                    value,
                    meta: Meta {
                        outcome: Outcome::MissFollowerHit,
                        lease_until: Some(lease_until),
                        waited: Some(waited),
                    },
                })
            }
            None => {
                let ctx = FetchContext {
                    key: key.to_string(),
                    signal: r.signal.as_ref().map(|s| s.child_token()),
                };
                let value = phase::run(Phase::Fetcher, key, None, fetcher(ctx)).await?;
                phase::run(
                    Phase::HooksOnFallback,
                    key,
                    None,
                    hooks.fallback(
                        &value,
                        FallbackInfo {
                            key: key.to_string(),
                            lease_until,
                            waited,
                        },
                    ),
                )
                .await?;
                log::debug!(
                    "{}.get_or_set() => MISS-FOLLOWER-FALLBACK after {:?}",
                    key,
                    waited
                );
                Ok(FlightResult {
                    value,
                    meta: Meta {
                        outcome: Outcome::MissFollowerFallback,
                        lease_until: Some(lease_until),
                        waited: Some(waited),
                    },
                })
            }
        }
    }
}

/// Scoped release of a leader's lease. Normal and error paths release
/// explicitly; if the flow is dropped mid-call (cancellation), `Drop`
/// schedules the release instead, the same either way: owner-checked and
/// with failures swallowed after logging.
struct LeaseGuard {
    leases: Arc<dyn Leases>,
    adapter: &'static str,
    key: String,
    owner: String,
    armed: bool,
}

impl LeaseGuard {
    fn new(leases: Arc<dyn Leases>, adapter: &'static str, key: &str, owner: &str) -> Self {
        Self {
            leases,
            adapter,
            key: key.to_string(),
            owner: owner.to_string(),
            armed: true,
        }
    }

    async fn release(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        let released = phase::run(
            Phase::LeasesRelease,
            &self.key,
            Some(self.adapter),
            self.leases.release(&self.key, &self.owner),
        )
        .await;
        match released {
            Ok(()) => log::debug!("{}.release({}) => OK", self.key, self.owner),
            Err(err) => log::warn!("{}.release({}) => {}", self.key, self.owner, err),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log::debug!("{}.drop({})", self.key, self.owner);
        let leases = self.leases.clone();
        let key = std::mem::take(&mut self.key);
        let owner = std::mem::take(&mut self.owner);
        tokio::spawn(async move {
            if let Err(err) = leases.release(&key, &owner).await {
                log::warn!("{}.release({}) => {}", key, owner, err);
            }
        });
    }
}

fn encode<V: Serialize>(key: &str, value: &V) -> Result<Bytes, Error> {
    serde_json::to_vec(value).map(Bytes::from).map_err(|err| {
        Error::new(ErrorKind::CacheSet, Phase::CacheSet, "failed to encode value")
            .with_key(key)
            .with_cause(Box::new(err))
    })
}

fn decode<V: DeserializeOwned>(key: &str, raw: &Bytes) -> Result<V, Error> {
    serde_json::from_slice(raw).map_err(|err| {
        Error::new(
            ErrorKind::CacheGet,
            Phase::CacheGet,
            "failed to decode cached value",
        )
        .with_key(key)
        .with_cause(Box::new(err))
    })
}
