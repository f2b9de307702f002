//! Redelivery policy (spec §4.6): computes the backoff delay before a
//! locally-redelivered message is handed back to the application, and
//! decides when a message has exhausted its redelivery budget and must be
//! routed to a dead-letter destination instead.

use rand::Rng;
use std::time::Duration;

/// Defaults mirror `original_source`'s `ActiveMQ::core::RedeliveryPolicy`
/// (`activemq-cpp`'s `RedeliveryPolicy.h`): 1s initial delay, backoff
/// multiplier 5.0 only when exponential backoff is enabled (disabled by
/// default), collision-avoidance jitter disabled by default, unlimited
/// redeliveries capped by `maximum_redeliveries`, and `max_delay` left
/// unbounded (`maximumRedeliveryDelay=-1` upstream) unless the caller
/// configures a cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedeliveryPolicy {
    pub initial_delay: Duration,
    pub back_off_multiplier: f64,
    pub use_exponential_back_off: bool,
    pub max_delay: Duration,
    pub collision_avoidance_percent: f64,
    pub use_collision_avoidance: bool,
    /// -1 means infinite (spec §4.6).
    pub maximum_redeliveries: i32,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            back_off_multiplier: 5.0,
            use_exponential_back_off: false,
            max_delay: Duration::MAX,
            collision_avoidance_percent: 0.15,
            use_collision_avoidance: false,
            maximum_redeliveries: 6,
        }
    }
}

impl RedeliveryPolicy {
    /// `nextDelay = initial * backOffMultiplier^(n-1)` clamped to
    /// `maxDelay`, with optional +/- `collisionAvoidanceFactor * random`
    /// jitter (spec §4.6). `redelivery_count` is 1 on the first redelivery.
    pub fn next_delay(&self, redelivery_count: u32) -> Duration {
        let base_ms = if self.use_exponential_back_off && redelivery_count > 0 {
            let factor = self.back_off_multiplier.powi(redelivery_count as i32 - 1);
            (self.initial_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64)
        } else {
            (self.initial_delay.as_millis() as f64).min(self.max_delay.as_millis() as f64)
        };

        let jittered_ms = if self.use_collision_avoidance {
            let jitter = base_ms * self.collision_avoidance_percent;
            let offset = rand::thread_rng().gen_range(-jitter..=jitter);
            (base_ms + offset).max(0.0)
        } else {
            base_ms
        };

        Duration::from_millis(jittered_ms.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// Whether `redelivery_count` has exhausted the policy's budget and the
    /// message must be dead-lettered instead of redelivered again.
    pub fn is_exhausted(&self, redelivery_count: u32) -> bool {
        self.maximum_redeliveries >= 0 && redelivery_count > self.maximum_redeliveries as u32
    }
}
