use crate::error::BoxError;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

/// Inputs available to a wait strategy when it computes the next inter-poll
/// delay of the follower loop.
#[derive(Debug, Clone, Copy)]
pub struct WaitContext {
    /// Completed poll iterations so far, starting at 0.
    pub attempt: u32,
    /// Time spent in the loop so far.
    pub elapsed: Duration,
    /// Wait budget left; delays are clamped to this.
    pub remaining: Duration,
    pub wait_max: Duration,
    pub wait_step: Duration,
}

/// Computes the delay before the next follower poll. Implementations must
/// be pure with respect to the context; the runtime never retries a failed
/// strategy.
pub trait WaitStrategy: Send + Sync {
    fn next_delay(&self, ctx: &WaitContext) -> Result<Duration, BoxError>;
}

impl<F> WaitStrategy for F
where
    F: Fn(&WaitContext) -> Result<Duration, BoxError> + Send + Sync,
{
    fn next_delay(&self, ctx: &WaitContext) -> Result<Duration, BoxError> {
        self(ctx)
    }
}

/// Polls at the configured `wait_step` interval. The default strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedWait;

impl WaitStrategy for FixedWait {
    fn next_delay(&self, ctx: &WaitContext) -> Result<Duration, BoxError> {
        Ok(ctx.wait_step.min(ctx.remaining))
    }
}

/// Exponential backoff indexed by attempt, with an optional symmetric
/// jitter fraction applied to each delay.
#[derive(Clone)]
pub struct ExponentialWait {
    backoff: ExponentialBackoff,
    jitter: f64,
}

impl ExponentialWait {
    /// Backoff starting at `base` milliseconds, multiplying by `base` per
    /// attempt until capped by [`ExponentialWait::with_max_delay`].
    pub fn from_millis(base: u64) -> Self {
        Self {
            backoff: ExponentialBackoff::from_millis(base),
            jitter: 0.0,
        }
    }

    pub fn with_factor(mut self, factor: u64) -> Self {
        self.backoff = self.backoff.factor(factor);
        self
    }

    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.backoff = self.backoff.max_delay(max);
        self
    }

    /// Jitter fraction in `[0, 1]`; each delay is scaled by a uniform
    /// factor in `[1 - jitter, 1 + jitter]`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

impl WaitStrategy for ExponentialWait {
    fn next_delay(&self, ctx: &WaitContext) -> Result<Duration, BoxError> {
        // The backoff iterator saturates, so nth() is always Some.
        let base = self
            .backoff
            .clone()
            .nth(ctx.attempt as usize)
            .unwrap_or(ctx.wait_step);

        let delay = if self.jitter > 0.0 {
            use rand::Rng;
            let scale = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            Duration::from_millis((base.as_millis() as f64 * scale).max(0.0) as u64)
        } else {
            base
        };

        Ok(delay.min(ctx.remaining))
    }
}
