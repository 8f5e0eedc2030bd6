//! Wait-time strategies applied between poll cycles.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Decides how much longer the poller sleeps after a cycle.
pub trait BackoffStrategy: Send + Sync {
    /// Called after every successful fetch with the number of tasks received.
    fn reconfigure(&self, fetched: usize);

    /// Extra wait added to the poll interval.
    fn backoff_time(&self) -> Duration;
}

/// Doubles the wait after each empty fetch, up to a cap; resets when tasks arrive.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    factor: u32,
    max: Duration,
    level: AtomicU32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, factor: u32, max: Duration) -> Self {
        Self {
            initial,
            factor: factor.max(1),
            max,
            level: AtomicU32::new(0),
        }
    }

    pub fn level(&self) -> u32 {
        self.level.load(Ordering::Relaxed)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 2, Duration::from_secs(60))
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn reconfigure(&self, fetched: usize) {
        if fetched == 0 {
            // Level only needs to grow until the cap is reached.
            let _ = self
                .level
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |level| {
                    (self.wait_for(level) < self.max).then_some(level + 1)
                });
        } else {
            self.level.store(0, Ordering::Relaxed);
        }
    }

    fn backoff_time(&self) -> Duration {
        self.wait_for(self.level())
    }
}

impl ExponentialBackoff {
    fn wait_for(&self, level: u32) -> Duration {
        if level == 0 {
            return Duration::ZERO;
        }
        let multiplier = self.factor.checked_pow(level - 1).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(multiplier)
            .map_or(self.max, |wait| wait.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_on_empty_fetches_and_caps() {
        let backoff = ExponentialBackoff::new(
            Duration::from_millis(500),
            2,
            Duration::from_millis(3000),
        );
        assert_eq!(backoff.backoff_time(), Duration::ZERO);

        let mut waits = Vec::new();
        for _ in 0..6 {
            backoff.reconfigure(0);
            waits.push(backoff.backoff_time().as_millis());
        }
        assert_eq!(waits, [500, 1000, 2000, 3000, 3000, 3000]);
    }

    #[test]
    fn resets_once_tasks_arrive() {
        let backoff = ExponentialBackoff::default();
        backoff.reconfigure(0);
        backoff.reconfigure(0);
        assert_eq!(backoff.backoff_time(), Duration::from_millis(1000));

        backoff.reconfigure(3);
        assert_eq!(backoff.level(), 0);
        assert_eq!(backoff.backoff_time(), Duration::ZERO);
    }
}
