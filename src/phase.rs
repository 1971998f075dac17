use crate::error::{AdapterError, BoxError, Error, ErrorKind};
use std::fmt;
use std::future::Future;
use tracing::Instrument;

/// Named side-effecting step of the `get_or_set` flow. Used to tag errors
/// and tracing spans with a stable identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Validation,
    CacheGet,
    CacheSet,
    LeasesAcquire,
    LeasesRelease,
    LeasesMarkReady,
    LeasesIsReady,
    Fetcher,
    HooksOnHit,
    HooksOnLeader,
    HooksOnFollowerWait,
    HooksOnFallback,
    WaitStrategy,
    WaitSleep,
    Abort,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Validation => "validation",
            Phase::CacheGet => "cache.get",
            Phase::CacheSet => "cache.set",
            Phase::LeasesAcquire => "leases.acquire",
            Phase::LeasesRelease => "leases.release",
            Phase::LeasesMarkReady => "leases.markReady",
            Phase::LeasesIsReady => "leases.isReady",
            Phase::Fetcher => "fetcher",
            Phase::HooksOnHit => "hooks.onHit",
            Phase::HooksOnLeader => "hooks.onLeader",
            Phase::HooksOnFollowerWait => "hooks.onFollowerWait",
            Phase::HooksOnFallback => "hooks.onFallback",
            Phase::WaitStrategy => "waitStrategy",
            Phase::WaitSleep => "wait.sleep",
            Phase::Abort => "abort",
        }
    }

    /// Error classification for a raw failure inside this phase.
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Phase::Validation => ErrorKind::Validation,
            Phase::CacheGet => ErrorKind::CacheGet,
            Phase::CacheSet => ErrorKind::CacheSet,
            Phase::LeasesAcquire => ErrorKind::LeaseAcquire,
            Phase::LeasesRelease => ErrorKind::LeaseRelease,
            Phase::LeasesMarkReady | Phase::LeasesIsReady => ErrorKind::LeaseReady,
            Phase::Fetcher => ErrorKind::Fetcher,
            Phase::HooksOnHit
            | Phase::HooksOnLeader
            | Phase::HooksOnFollowerWait
            | Phase::HooksOnFallback => ErrorKind::Hook,
            Phase::WaitStrategy => ErrorKind::WaitStrategy,
            Phase::WaitSleep => ErrorKind::Wait,
            Phase::Abort => ErrorKind::Aborted,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw failure of a phase, before tagging. Already-tagged errors pass
/// through `run` unchanged.
pub(crate) enum Fault {
    Tagged(Error),
    Adapter(AdapterError),
    Raw(BoxError),
}

impl From<Error> for Fault {
    fn from(err: Error) -> Self {
        Fault::Tagged(err)
    }
}

impl From<AdapterError> for Fault {
    fn from(err: AdapterError) -> Self {
        Fault::Adapter(err)
    }
}

impl From<BoxError> for Fault {
    fn from(err: BoxError) -> Self {
        Fault::Raw(err)
    }
}

/// Run one phase: instrument it with a span, and map any failure to the
/// phase's tagged error kind with the original failure kept as the cause.
pub(crate) async fn run<T, E, F>(
    phase: Phase,
    key: &str,
    adapter: Option<&'static str>,
    op: F,
) -> Result<T, Error>
where
    E: Into<Fault>,
    F: Future<Output = Result<T, E>>,
{
    let span = tracing::debug_span!(
        "cache_lease.phase",
        phase = %phase,
        key = %key,
        adapter = adapter.unwrap_or("-"),
    );

    match op.instrument(span).await {
        Ok(value) => Ok(value),
        Err(raw) => Err(match raw.into() {
            Fault::Tagged(err) => err,
            Fault::Adapter(err) => Error::new(phase.kind(), phase, err.to_string())
                .with_key(key)
                .with_adapter(adapter)
                .with_cause(Box::new(err)),
            Fault::Raw(cause) => Error::new(phase.kind(), phase, cause.to_string())
                .with_key(key)
                .with_adapter(adapter)
                .with_cause(cause),
        }),
    }
}
