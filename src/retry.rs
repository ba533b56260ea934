//! Retry policy selection and scheduling.
//!
//! The engine answers one question: given an operation that just failed
//! transiently, when (if ever) should it be attempted again? The answer is
//! stored on the operation itself, so changing the policy later never moves a
//! retry that has already been scheduled.

use core::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::time::Instant;

/// Delay used by [`RetryPolicy::Interval`] unless overridden.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// First delay of the exponential policies.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Largest delay the exponential policies will ever produce.
pub const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Upper bound of the extra delay added by the jitter policy, in percent of
/// the backoff delay.
pub const JITTER_PERCENT: u64 = 20;

/// Upper bound of the [`RetryPolicy::Random`] delay.
pub const RANDOM_MAX: Duration = Duration::from_secs(5);

// 2^16 seconds is already far past the cap.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Strategy applied after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RetryPolicy {
    /// Never retry; the operation fails at once.
    None,
    /// Retry on the next pump.
    Immediate,
    /// Retry after a fixed delay.
    Interval,
    /// Retry after a delay that doubles with every attempt.
    ExponentialBackoff,
    /// Exponential backoff plus bounded random jitter.
    #[default]
    ExponentialBackoffWithJitter,
    /// Retry after a random delay.
    Random,
}

/// The application-facing retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryConfig {
    /// Active policy.
    pub policy: RetryPolicy,
    /// Horizon after which an operation is abandoned as timed out, measured
    /// from the moment it was first submitted. Zero means unbounded.
    pub timeout_limit: Duration,
}

/// What to do with an operation after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RetryDecision {
    /// Resubmit once the clock reaches this instant.
    RetryAt(Instant),
    /// The policy does not retry.
    GiveUp,
    /// The retry horizon has passed.
    TimedOut,
}

/// Computes retry schedules under the current [`RetryConfig`].
#[derive(Debug)]
pub struct RetryEngine {
    config: RetryConfig,
    interval: Duration,
    rng: SmallRng,
}

impl RetryEngine {
    /// Creates an engine. `seed` feeds the jitter and random policies.
    pub fn new(config: RetryConfig, seed: u64) -> Self {
        Self {
            config,
            interval: DEFAULT_RETRY_INTERVAL,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> RetryConfig {
        self.config
    }

    /// Replaces the configuration for all decisions made from now on.
    pub fn set_config(&mut self, config: RetryConfig) {
        self.config = config;
    }

    /// Overrides the delay used by [`RetryPolicy::Interval`].
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Whether an operation first submitted at `since` has outlived the
    /// retry horizon.
    pub fn is_expired(&self, since: Instant, now: Instant) -> bool {
        !self.config.timeout_limit.is_zero()
            && now.saturating_duration_since(since) > self.config.timeout_limit
    }

    /// Decides what happens after failed attempt number `attempt` (1-based)
    /// of an operation first submitted at `since`.
    pub fn evaluate(&mut self, since: Instant, attempt: u32, now: Instant) -> RetryDecision {
        if self.is_expired(since, now) {
            return RetryDecision::TimedOut;
        }
        match self.delay(attempt) {
            Some(delay) => RetryDecision::RetryAt(now.saturating_add(delay)),
            None => RetryDecision::GiveUp,
        }
    }

    fn delay(&mut self, attempt: u32) -> Option<Duration> {
        let delay = match self.config.policy {
            RetryPolicy::None => return None,
            RetryPolicy::Immediate => Duration::ZERO,
            RetryPolicy::Interval => self.interval,
            RetryPolicy::ExponentialBackoff => backoff(attempt),
            RetryPolicy::ExponentialBackoffWithJitter => {
                let base = backoff(attempt);
                let spread = millis(base).saturating_mul(JITTER_PERCENT) / 100;
                base + Duration::from_millis(self.rng.gen_range(0..=spread))
            }
            RetryPolicy::Random => Duration::from_millis(self.rng.gen_range(0..=millis(RANDOM_MAX))),
        };
        Some(delay)
    }
}

fn backoff(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    let delay = millis(BACKOFF_BASE).saturating_mul(1_u64 << shift);
    Duration::from_millis(delay.min(millis(BACKOFF_CAP)))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
