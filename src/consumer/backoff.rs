use std::time::Duration;

use crate::config::RetryPolicy;

/// Delay calculator for consecutive transient fetch failures.
#[derive(Debug)]
pub(crate) struct Backoff {
    policy: RetryPolicy,
    next: Duration,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        let next = policy.initial_delay;
        Self {
            policy,
            next,
            attempt: 0,
        }
    }

    /// Delay to wait before the next attempt; grows with each call.
    pub(crate) fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let delay = self.next.min(self.policy.max_delay);
        let scaled = delay.as_nanos() as f64 * self.policy.multiplier;
        self.next = Duration::from_nanos(scaled.min(u64::MAX as f64) as u64)
            .min(self.policy.max_delay);
        delay
    }

    /// Back to the initial delay after a successful call.
    pub(crate) fn reset(&mut self) {
        self.next = self.policy.initial_delay;
        self.attempt = 0;
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }
}
