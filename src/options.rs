use crate::backend::{Cache, Leases};
use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::hooks::Hooks;
use crate::memory::MemoryAdapter;
use crate::wait::{FixedWait, WaitStrategy};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(15);
pub const DEFAULT_WAIT_MAX: Duration = Duration::from_secs(4);
pub const DEFAULT_WAIT_STEP: Duration = Duration::from_millis(250);

pub type ShouldCache<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

/// Backend selection by name. Descriptor-built adapters are interned per
/// descriptor instance, so passing the same `Arc` to many `CacheLease`
/// values reuses one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AdapterDescriptor {
    Memory,
}

impl AdapterDescriptor {
    fn name(&self) -> &'static str {
        match self {
            AdapterDescriptor::Memory => "memory",
        }
    }
}

/// Backends for one `CacheLease`: either a ready-made pair or a descriptor
/// resolved (and interned) at construction.
pub enum AdapterSpec {
    Pair {
        cache: Arc<dyn Cache>,
        leases: Option<Arc<dyn Leases>>,
    },
    Descriptor(Arc<AdapterDescriptor>),
}

impl From<MemoryAdapter> for AdapterSpec {
    fn from(adapter: MemoryAdapter) -> Self {
        AdapterSpec::Pair {
            cache: adapter.cache(),
            leases: Some(adapter.leases()),
        }
    }
}

impl From<AdapterDescriptor> for AdapterSpec {
    fn from(descriptor: AdapterDescriptor) -> Self {
        AdapterSpec::Descriptor(Arc::new(descriptor))
    }
}

impl From<Arc<AdapterDescriptor>> for AdapterSpec {
    fn from(descriptor: Arc<AdapterDescriptor>) -> Self {
        AdapterSpec::Descriptor(descriptor)
    }
}

#[derive(Clone)]
pub(crate) struct AdapterPair {
    pub(crate) cache: Arc<dyn Cache>,
    pub(crate) leases: Arc<dyn Leases>,
    pub(crate) name: &'static str,
}

// Interned descriptor-built adapters, keyed by descriptor identity. The
// descriptor Arc is kept alive in the value so the pointer key stays valid.
static INTERNED: Lazy<DashMap<usize, (Arc<AdapterDescriptor>, AdapterPair)>> =
    Lazy::new(DashMap::new);

fn build_adapter(descriptor: &AdapterDescriptor) -> AdapterPair {
    match descriptor {
        AdapterDescriptor::Memory => {
            let adapter = MemoryAdapter::new();
            AdapterPair {
                cache: adapter.cache(),
                leases: adapter.leases(),
                name: descriptor.name(),
            }
        }
    }
}

fn resolve_adapter(spec: AdapterSpec) -> Result<AdapterPair, Error> {
    match spec {
        AdapterSpec::Pair { cache, leases } => match leases {
            Some(leases) => Ok(AdapterPair {
                cache,
                leases,
                name: "custom",
            }),
            None => Err(Error::validation(
                "adapter provides no lease backend and none was supplied",
            )),
        },
        AdapterSpec::Descriptor(descriptor) => {
            let key = Arc::as_ptr(&descriptor) as usize;
            let entry = INTERNED
                .entry(key)
                .or_insert_with(|| (descriptor.clone(), build_adapter(&descriptor)));
            Ok(entry.1.clone())
        }
    }
}

/// Entry point for coordinated cache fills. Holds the backends plus the
/// instance defaults that per-call [`CallOptions`] are merged onto.
///
/// The type parameter is the cached value type; it must round-trip through
/// the JSON codec used on the cache wire.
impl<V> std::fmt::Debug for CacheLease<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLease")
            .field("adapter", &self.adapter)
            .field("lease_ttl", &self.lease_ttl)
            .field("wait_max", &self.wait_max)
            .field("wait_step", &self.wait_step)
            .field("cache_ttl", &self.cache_ttl)
            .field("validate", &self.validate)
            .finish_non_exhaustive()
    }
}

pub struct CacheLease<V> {
    pub(crate) cache: Arc<dyn Cache>,
    pub(crate) leases: Arc<dyn Leases>,
    pub(crate) adapter: &'static str,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) lease_ttl: Duration,
    pub(crate) wait_max: Duration,
    pub(crate) wait_step: Duration,
    pub(crate) cache_ttl: Option<Duration>,
    pub(crate) should_cache: Option<ShouldCache<V>>,
    pub(crate) wait_strategy: Arc<dyn WaitStrategy>,
    pub(crate) hooks: Hooks<V>,
    pub(crate) validate: bool,
}

impl<V> CacheLease<V> {
    pub fn new(spec: impl Into<AdapterSpec>) -> Result<Self, Error> {
        let pair = resolve_adapter(spec.into())?;
        Ok(Self {
            cache: pair.cache,
            leases: pair.leases,
            adapter: pair.name,
            clock: Arc::new(SystemClock),
            lease_ttl: DEFAULT_LEASE_TTL,
            wait_max: DEFAULT_WAIT_MAX,
            wait_step: DEFAULT_WAIT_STEP,
            cache_ttl: None,
            should_cache: None,
            wait_strategy: Arc::new(FixedWait),
            hooks: Hooks::default(),
            validate: true,
        })
    }

    /// Replace the lease backend resolved from the adapter.
    pub fn with_leases(mut self, leases: Arc<dyn Leases>) -> Self {
        self.leases = leases;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Lease expiry granted to a leader. Default is 15 seconds; this is the
    /// liveness bound if a leader dies mid-fetch.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Total wait budget of a follower before it fetches on its own.
    /// Default is 4 seconds.
    pub fn with_wait_max(mut self, wait_max: Duration) -> Self {
        self.wait_max = wait_max;
        self
    }

    /// Base inter-poll delay of the follower loop. Default is 250ms.
    pub fn with_wait_step(mut self, wait_step: Duration) -> Self {
        self.wait_step = wait_step;
        self
    }

    /// TTL for values written by a leader. Default is no expiry.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Predicate deciding whether a fetched value is written to the cache.
    /// Must be side-effect free; it is invoked exactly once per leader.
    pub fn with_should_cache<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        self.should_cache = Some(Arc::new(predicate));
        self
    }

    pub fn with_wait_strategy(mut self, strategy: impl WaitStrategy + 'static) -> Self {
        self.wait_strategy = Arc::new(strategy);
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks<V>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Skip input validation on the hot path. Shape errors then surface
    /// from whichever downstream step trips over them.
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }
}

/// Per-call overrides merged onto the instance defaults.
pub struct CallOptions<V> {
    pub lease_ttl: Option<Duration>,
    pub wait_max: Option<Duration>,
    pub wait_step: Option<Duration>,
    pub cache_ttl: Option<Duration>,
    /// Identity used for lease ownership checks. Defaults to a fresh v4
    /// UUID per call.
    pub owner_id: Option<String>,
    pub should_cache: Option<ShouldCache<V>>,
    pub wait_strategy: Option<Arc<dyn WaitStrategy>>,
    /// External cancel signal raced against the whole call.
    pub signal: Option<CancellationToken>,
    /// Hooks appended after the instance hooks for the same event.
    pub hooks: Hooks<V>,
    pub validate: Option<bool>,
}

impl<V> Default for CallOptions<V> {
    fn default() -> Self {
        Self {
            lease_ttl: None,
            wait_max: None,
            wait_step: None,
            cache_ttl: None,
            owner_id: None,
            should_cache: None,
            wait_strategy: None,
            signal: None,
            hooks: Hooks::default(),
            validate: None,
        }
    }
}

/// Immutable merge of instance defaults and one call's overrides.
impl<V> std::fmt::Debug for Resolved<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("key", &self.key)
            .field("owner_id", &self.owner_id)
            .field("lease_ttl", &self.lease_ttl)
            .field("wait_max", &self.wait_max)
            .field("wait_step", &self.wait_step)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

pub(crate) struct Resolved<V> {
    pub(crate) key: String,
    pub(crate) owner_id: String,
    pub(crate) lease_ttl: Duration,
    pub(crate) wait_max: Duration,
    pub(crate) wait_step: Duration,
    pub(crate) cache_ttl: Option<Duration>,
    pub(crate) should_cache: Option<ShouldCache<V>>,
    pub(crate) wait_strategy: Arc<dyn WaitStrategy>,
    pub(crate) signal: Option<CancellationToken>,
    pub(crate) hooks: Hooks<V>,
}

pub(crate) fn resolve<V>(
    instance: &CacheLease<V>,
    key: &str,
    opts: CallOptions<V>,
) -> Result<Resolved<V>, Error> {
    let validate = opts.validate.unwrap_or(instance.validate);
    if validate && key.is_empty() {
        return Err(Error::validation("key must be a non-empty string"));
    }

    let owner_id = match opts.owner_id {
        Some(owner) => {
            if validate && owner.is_empty() {
                return Err(Error::validation("owner_id must be a non-empty string").with_key(key));
            }
            owner
        }
        None => uuid::Uuid::new_v4().to_string(),
    };

    Ok(Resolved {
        key: key.to_string(),
        owner_id,
        lease_ttl: opts.lease_ttl.unwrap_or(instance.lease_ttl),
        wait_max: opts.wait_max.unwrap_or(instance.wait_max),
        wait_step: opts.wait_step.unwrap_or(instance.wait_step),
        cache_ttl: opts.cache_ttl.or(instance.cache_ttl),
        should_cache: opts.should_cache.or_else(|| instance.should_cache.clone()),
        wait_strategy: opts
            .wait_strategy
            .unwrap_or_else(|| instance.wait_strategy.clone()),
        signal: opts.signal,
        hooks: opts.hooks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn flight() -> CacheLease<String> {
        CacheLease::new(MemoryAdapter::new()).unwrap()
    }

    #[test]
    fn empty_key_fails_validation_eagerly() {
        let err = resolve(&flight(), "", CallOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn empty_key_is_let_through_when_validation_is_off() {
        let flight = flight().without_validation();
        assert!(resolve(&flight, "", CallOptions::default()).is_ok());
    }

    #[test]
    fn empty_owner_fails_validation() {
        let err = resolve(
            &flight(),
            "k",
            CallOptions {
                owner_id: Some(String::new()),
                ..CallOptions::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn owner_defaults_to_a_unique_id() {
        let a = resolve(&flight(), "k", CallOptions::default()).unwrap();
        let b = resolve(&flight(), "k", CallOptions::default()).unwrap();
        assert!(!a.owner_id.is_empty());
        assert_ne!(a.owner_id, b.owner_id);
    }

    #[test]
    fn call_overrides_win_over_instance_defaults() {
        let flight = flight()
            .with_lease_ttl(Duration::from_secs(30))
            .with_cache_ttl(Duration::from_secs(60));
        let resolved = resolve(
            &flight,
            "k",
            CallOptions {
                lease_ttl: Some(Duration::from_secs(1)),
                ..CallOptions::default()
            },
        )
        .unwrap();
        assert_eq!(resolved.lease_ttl, Duration::from_secs(1));
        assert_eq!(resolved.cache_ttl, Some(Duration::from_secs(60)));
        assert_eq!(resolved.wait_max, DEFAULT_WAIT_MAX);
        assert_eq!(resolved.wait_step, DEFAULT_WAIT_STEP);
    }

    #[test]
    fn pair_without_leases_is_rejected() {
        let adapter = MemoryAdapter::new();
        let err = CacheLease::<String>::new(AdapterSpec::Pair {
            cache: adapter.cache(),
            leases: None,
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn explicit_leases_can_replace_the_adapter_pair() {
        let adapter = MemoryAdapter::new();
        let other = MemoryAdapter::new();
        let flight = CacheLease::<String>::new(AdapterSpec::Pair {
            cache: adapter.cache(),
            leases: None,
        });
        assert!(flight.is_err());

        let flight = CacheLease::<String>::new(adapter)
            .unwrap()
            .with_leases(other.leases());
        assert_eq!(flight.adapter, "custom");
    }

    #[test]
    fn descriptor_adapters_are_interned_by_identity() {
        let descriptor = Arc::new(AdapterDescriptor::Memory);
        let first = resolve_adapter(AdapterSpec::Descriptor(descriptor.clone())).unwrap();
        let second = resolve_adapter(AdapterSpec::Descriptor(descriptor.clone())).unwrap();
        assert!(Arc::ptr_eq(&first.cache, &second.cache));

        let other = resolve_adapter(AdapterSpec::Descriptor(Arc::new(AdapterDescriptor::Memory)))
            .unwrap();
        assert!(!Arc::ptr_eq(&first.cache, &other.cache));
    }
}
