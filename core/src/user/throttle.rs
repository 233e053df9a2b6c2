//! Run-wide action throttle

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// Token bucket limiting actions per second across every user that shares it
///
/// Users hold it through an `Arc`; a disabled throttle never waits.
pub struct ActionThrottle {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    rate_limit: Option<f64>,
}

impl ActionThrottle {
    /// Create a throttle
    ///
    /// `None`, zero and negative rates disable it. Rates below one per second
    /// are honored through the replenish period.
    ///
    /// ```
    /// use swarm_bench_core::user::ActionThrottle;
    ///
    /// let limited = ActionThrottle::new(Some(100.0));
    /// assert!(limited.is_enabled());
    ///
    /// let unlimited = ActionThrottle::new(None);
    /// assert!(!unlimited.is_enabled());
    /// ```
    pub fn new(rate_limit: Option<f64>) -> Self {
        let limiter = rate_limit.and_then(|rps| {
            if !rps.is_finite() || rps <= 0.0 {
                return None;
            }
            let period = Duration::try_from_secs_f64(1.0 / rps).ok()?;
            let burst = NonZeroU32::new((rps.ceil() as u32).max(1))?;
            let quota = Quota::with_period(period)?.allow_burst(burst);
            Some(RateLimiter::direct(quota))
        });

        Self {
            limiter,
            rate_limit,
        }
    }

    /// Throttle that never waits
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Wait until the next action is allowed
    pub async fn wait(&self) {
        if let Some(ref limiter) = self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Whether a limit is in force
    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Configured actions per second
    pub fn rate_limit(&self) -> Option<f64> {
        self.rate_limit
    }
}

impl Default for ActionThrottle {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for ActionThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionThrottle")
            .field("rate_limit", &self.rate_limit)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
