use crate::error::BoxError;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Context passed to `on_hit`.
#[derive(Debug, Clone)]
pub struct HitInfo {
    pub key: String,
}

/// Context passed to `on_leader` after the fetch and any cache write.
#[derive(Debug, Clone)]
pub struct LeaderInfo {
    pub key: String,
    /// Expiry of the lease this call held, epoch milliseconds.
    pub lease_until: i64,
    /// Whether the fetched value was written to the cache.
    pub cached: bool,
}

/// How a follower's wait loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Hit,
    Fallback,
}

/// Context passed to `on_follower_wait`, exactly once per follower call.
#[derive(Debug, Clone)]
pub struct FollowerWaitInfo {
    pub key: String,
    /// Expiry of the lease held by the leader this call waited on.
    pub lease_until: i64,
    pub waited: Duration,
    pub outcome: WaitOutcome,
}

/// Context passed to `on_fallback` after the follower's own fetch.
#[derive(Debug, Clone)]
pub struct FallbackInfo {
    pub key: String,
    pub lease_until: i64,
    pub waited: Duration,
}

pub type OnHit<V> =
    Arc<dyn Fn(&V, HitInfo) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
pub type OnLeader<V> =
    Arc<dyn Fn(&V, LeaderInfo) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
pub type OnFollowerWait =
    Arc<dyn Fn(FollowerWaitInfo) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
pub type OnFallback<V> =
    Arc<dyn Fn(&V, FallbackInfo) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// User callbacks fired at the phase boundaries of `get_or_set`. The value
/// reference is only valid while the callback builds its future; clone what
/// the future needs. A failing hook aborts the call; hook errors are never
/// swallowed.
pub struct Hooks<V> {
    pub on_hit: Option<OnHit<V>>,
    pub on_leader: Option<OnLeader<V>>,
    pub on_follower_wait: Option<OnFollowerWait>,
    pub on_fallback: Option<OnFallback<V>>,
}

impl<V> Default for Hooks<V> {
    fn default() -> Self {
        Self {
            on_hit: None,
            on_leader: None,
            on_follower_wait: None,
            on_fallback: None,
        }
    }
}

impl<V> Clone for Hooks<V> {
    fn clone(&self) -> Self {
        Self {
            on_hit: self.on_hit.clone(),
            on_leader: self.on_leader.clone(),
            on_follower_wait: self.on_follower_wait.clone(),
            on_fallback: self.on_fallback.clone(),
        }
    }
}

impl<V> Hooks<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_hit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&V, HitInfo) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync + 'static,
    {
        self.on_hit = Some(Arc::new(hook));
        self
    }

    pub fn on_leader<F>(mut self, hook: F) -> Self
    where
        F: Fn(&V, LeaderInfo) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync + 'static,
    {
        self.on_leader = Some(Arc::new(hook));
        self
    }

    pub fn on_follower_wait<F>(mut self, hook: F) -> Self
    where
        F: Fn(FollowerWaitInfo) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync + 'static,
    {
        self.on_follower_wait = Some(Arc::new(hook));
        self
    }

    pub fn on_fallback<F>(mut self, hook: F) -> Self
    where
        F: Fn(&V, FallbackInfo) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync + 'static,
    {
        self.on_fallback = Some(Arc::new(hook));
        self
    }
}

/// Instance hooks chained before per-call hooks for the same event.
pub(crate) struct HookChain<'a, V> {
    instance: &'a Hooks<V>,
    call: &'a Hooks<V>,
}

impl<'a, V> HookChain<'a, V> {
    pub(crate) fn new(instance: &'a Hooks<V>, call: &'a Hooks<V>) -> Self {
        Self { instance, call }
    }

    pub(crate) async fn hit(&self, value: &V, info: HitInfo) -> Result<(), BoxError> {
        for hook in [&self.instance.on_hit, &self.call.on_hit].into_iter().flatten() {
            hook(value, info.clone()).await?;
        }
        Ok(())
    }

    pub(crate) async fn leader(&self, value: &V, info: LeaderInfo) -> Result<(), BoxError> {
        for hook in [&self.instance.on_leader, &self.call.on_leader]
            .into_iter()
            .flatten()
        {
            hook(value, info.clone()).await?;
        }
        Ok(())
    }

    pub(crate) async fn follower_wait(&self, info: FollowerWaitInfo) -> Result<(), BoxError> {
        for hook in [&self.instance.on_follower_wait, &self.call.on_follower_wait]
            .into_iter()
            .flatten()
        {
            hook(info.clone()).await?;
        }
        Ok(())
    }

    pub(crate) async fn fallback(&self, value: &V, info: FallbackInfo) -> Result<(), BoxError> {
        for hook in [&self.instance.on_fallback, &self.call.on_fallback]
            .into_iter()
            .flatten()
        {
            hook(value, info.clone()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> OnHit<String> {
        Arc::new(move |_, _| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push(tag);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn instance_hooks_run_before_call_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let instance = Hooks::<String> {
            on_hit: Some(recorder(log.clone(), "instance")),
            ..Hooks::default()
        };
        let call = Hooks::<String> {
            on_hit: Some(recorder(log.clone(), "call")),
            ..Hooks::default()
        };

        HookChain::new(&instance, &call)
            .hit(&"v".to_string(), HitInfo { key: "k".into() })
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["instance", "call"]);
    }

    #[tokio::test]
    async fn a_failing_instance_hook_skips_the_call_hook() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let instance = Hooks::<String>::new()
            .on_hit(|_, _| Box::pin(async { Err::<(), BoxError>("nope".into()) }));
        let call = Hooks::<String> {
            on_hit: Some(recorder(log.clone(), "call")),
            ..Hooks::default()
        };

        let res = HookChain::new(&instance, &call)
            .hit(&"v".to_string(), HitInfo { key: "k".into() })
            .await;

        assert!(res.is_err());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_hooks_are_a_no_op() {
        let instance = Hooks::<String>::new();
        let call = Hooks::<String>::new();
        HookChain::new(&instance, &call)
            .follower_wait(FollowerWaitInfo {
                key: "k".into(),
                lease_until: 0,
                waited: Duration::ZERO,
                outcome: WaitOutcome::Fallback,
            })
            .await
            .unwrap();
    }
}
