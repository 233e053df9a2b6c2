//! Think-time policies between consecutive actions of one user
//!
//! - **Between**: delay drawn uniformly from `[min, max]` on every call
//! - **Constant**: fixed delay
//! - **ConstantPacing**: fixed interval between action starts
//! - **Exponential**: delays drawn from an exponential distribution
//! - **NoWait**: no delay at all (stress scenarios)

use crate::config::{duration_secs, ConfigError};
use rand::RngCore;
use rand_distr::{Distribution, Exp, Uniform};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Computes the delay a virtual user waits before its next action
///
/// Policies are shared by every user of a profile, so they must not keep
/// per-call state: each call draws a fresh value from the calling user's
/// random source.
pub trait PacingPolicy: Send + Sync + fmt::Debug {
    /// Delay before the next action
    fn next_delay(&self, rng: &mut dyn RngCore) -> Duration;

    /// Delay before the next action, given how long the last action took
    fn delay_after(&self, _action_elapsed: Duration, rng: &mut dyn RngCore) -> Duration {
        self.next_delay(rng)
    }

    /// Policy name
    fn name(&self) -> &str;
}

/// Uniformly distributed delay in `[min, max]`
#[derive(Debug, Clone)]
pub struct Between {
    min: Duration,
    max: Duration,
    distribution: Uniform<f64>,
}

impl Between {
    /// Create a new uniform policy
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvalidPacing(format!(
                "min {:?} is larger than max {:?}",
                min, max
            )));
        }
        Ok(Self {
            min,
            max,
            distribution: Uniform::new_inclusive(min.as_secs_f64(), max.as_secs_f64()),
        })
    }

    /// Lower bound
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Upper bound
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl PacingPolicy for Between {
    fn next_delay(&self, rng: &mut dyn RngCore) -> Duration {
        let secs = self.distribution.sample(rng);
        Duration::from_secs_f64(secs.max(0.0)).clamp(self.min, self.max)
    }

    fn name(&self) -> &str {
        "between"
    }
}

/// Fixed delay between actions
#[derive(Debug, Clone, Copy)]
pub struct Constant {
    delay: Duration,
}

impl Constant {
    /// Create a new constant policy
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl PacingPolicy for Constant {
    fn next_delay(&self, _rng: &mut dyn RngCore) -> Duration {
        self.delay
    }

    fn name(&self) -> &str {
        "constant"
    }
}

/// Fixed interval between the *starts* of consecutive actions
///
/// The delay shrinks by the time the last action took, and is zero when the
/// action overran the interval.
#[derive(Debug, Clone, Copy)]
pub struct ConstantPacing {
    interval: Duration,
}

impl ConstantPacing {
    /// Create a new pacing policy
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl PacingPolicy for ConstantPacing {
    fn next_delay(&self, _rng: &mut dyn RngCore) -> Duration {
        self.interval
    }

    fn delay_after(&self, action_elapsed: Duration, _rng: &mut dyn RngCore) -> Duration {
        self.interval.saturating_sub(action_elapsed)
    }

    fn name(&self) -> &str {
        "constant_pacing"
    }
}

/// Exponentially distributed delay (Poisson arrivals per user)
#[derive(Debug, Clone)]
pub struct Exponential {
    distribution: Exp<f64>,
}

impl Exponential {
    /// Create a new exponential policy with the given mean delay
    pub fn new(mean: Duration) -> Result<Self, ConfigError> {
        if mean.is_zero() {
            return Err(ConfigError::InvalidPacing(
                "exponential mean must be positive".into(),
            ));
        }
        let distribution = Exp::new(1.0 / mean.as_secs_f64())
            .map_err(|e| ConfigError::InvalidPacing(e.to_string()))?;
        Ok(Self { distribution })
    }
}

impl PacingPolicy for Exponential {
    fn next_delay(&self, rng: &mut dyn RngCore) -> Duration {
        let secs = self.distribution.sample(rng);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    fn name(&self) -> &str {
        "exponential"
    }
}

/// No think time
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWait;

impl PacingPolicy for NoWait {
    fn next_delay(&self, _rng: &mut dyn RngCore) -> Duration {
        Duration::ZERO
    }

    fn name(&self) -> &str {
        "no_wait"
    }
}

/// Serializable pacing description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PacingConfig {
    /// Uniform in `[min, max]`
    Between {
        /// Lower bound
        #[serde(with = "duration_secs")]
        min: Duration,
        /// Upper bound
        #[serde(with = "duration_secs")]
        max: Duration,
    },
    /// Fixed delay
    Constant {
        /// Delay
        #[serde(with = "duration_secs")]
        delay: Duration,
    },
    /// Fixed interval between action starts
    ConstantPacing {
        /// Interval
        #[serde(with = "duration_secs")]
        interval: Duration,
    },
    /// Exponential with the given mean
    Exponential {
        /// Mean delay
        #[serde(with = "duration_secs")]
        mean: Duration,
    },
    /// No delay
    NoWait,
}

impl Default for PacingConfig {
    fn default() -> Self {
        PacingConfig::Between {
            min: Duration::from_secs(1),
            max: Duration::from_secs(5),
        }
    }
}

impl PacingConfig {
    /// Check bounds without building the policy
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build().map(|_| ())
    }

    /// Build the policy
    pub fn build(&self) -> Result<Arc<dyn PacingPolicy>, ConfigError> {
        Ok(match *self {
            PacingConfig::Between { min, max } => Arc::new(Between::new(min, max)?),
            PacingConfig::Constant { delay } => Arc::new(Constant::new(delay)),
            PacingConfig::ConstantPacing { interval } => Arc::new(ConstantPacing::new(interval)),
            PacingConfig::Exponential { mean } => Arc::new(Exponential::new(mean)?),
            PacingConfig::NoWait => Arc::new(NoWait),
        })
    }
}
