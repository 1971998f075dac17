use crate::phase::Phase;
use std::fmt;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stable classification of every failure the runtime can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    CacheGet,
    CacheSet,
    LeaseAcquire,
    LeaseRelease,
    LeaseReady,
    Fetcher,
    Hook,
    WaitStrategy,
    Wait,
    Aborted,
}

impl ErrorKind {
    /// Stable string identifier, suitable for metrics and log filtering.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::CacheGet => "CACHE_GET_FAILED",
            ErrorKind::CacheSet => "CACHE_SET_FAILED",
            ErrorKind::LeaseAcquire => "LEASE_ACQUIRE_FAILED",
            ErrorKind::LeaseRelease => "LEASE_RELEASE_FAILED",
            ErrorKind::LeaseReady => "LEASE_READY_FAILED",
            ErrorKind::Fetcher => "FETCHER_FAILED",
            ErrorKind::Hook => "HOOK_FAILED",
            ErrorKind::WaitStrategy => "WAIT_STRATEGY_FAILED",
            ErrorKind::Wait => "WAIT_FAILED",
            ErrorKind::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by `get_or_set`. Carries the failed phase, the key and
/// adapter when known, and the original failure as `source`.
#[derive(Debug, thiserror::Error)]
#[error("{}", self.describe())]
pub struct Error {
    kind: ErrorKind,
    message: String,
    phase: Phase,
    key: Option<String>,
    adapter: Option<&'static str>,
    #[source]
    cause: Option<BoxError>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            phase,
            key: None,
            adapter: None,
            cause: None,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, Phase::Validation, message)
    }

    pub(crate) fn aborted(key: &str) -> Self {
        Self::new(ErrorKind::Aborted, Phase::Abort, "call aborted by signal").with_key(key)
    }

    pub(crate) fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub(crate) fn with_adapter(mut self, adapter: Option<&'static str>) -> Self {
        self.adapter = adapter;
        self
    }

    pub(crate) fn with_cause(mut self, cause: BoxError) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn adapter(&self) -> Option<&'static str> {
        self.adapter
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    fn describe(&self) -> String {
        match &self.key {
            Some(key) => format!("{} in {} for `{}`: {}", self.kind, self.phase, key, self.message),
            None => format!("{} in {}: {}", self.kind, self.phase, self.message),
        }
    }
}

/// Failure reported by a storage adapter, before the runtime tags it with a
/// phase. `operation` names the adapter call that failed.
#[derive(Debug, thiserror::Error)]
#[error("{operation} failed for `{key}`")]
pub struct AdapterError {
    operation: &'static str,
    key: String,
    #[source]
    source: BoxError,
}

impl AdapterError {
    pub fn new(operation: &'static str, key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}
