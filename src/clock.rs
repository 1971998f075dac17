use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Time source used by the coordination runtime. Injectable so tests can
/// drive expiry and wait loops deterministically.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// Current wall time in epoch milliseconds.
    fn now_millis(&self) -> i64;

    /// Suspend the current task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the host; the default for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Manually driven clock. `sleep` advances the clock instead of suspending,
/// so a single-task flow runs to completion without real waiting.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Elapsed time between two `now_millis` reads, clamped at zero so a small
/// backwards step never produces a negative duration.
pub(crate) fn elapsed(start_millis: i64, end_millis: i64) -> Duration {
    Duration::from_millis((end_millis - start_millis).max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_millis(), 1_250);
        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[tokio::test]
    async fn manual_clock_sleep_advances() {
        let clock = ManualClock::new(0);
        clock.sleep(Duration::from_millis(40)).await;
        assert_eq!(clock.now_millis(), 40);
    }

    #[test]
    fn elapsed_clamps_backwards_steps() {
        assert_eq!(elapsed(100, 350), Duration::from_millis(250));
        assert_eq!(elapsed(350, 100), Duration::ZERO);
    }
}
