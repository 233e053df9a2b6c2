//! Builder pattern for VirtualUser construction

use crate::config::ExhaustionPolicy;
use crate::context::UserId;
use crate::error::{BenchError, BenchResult};
use crate::metrics::{ActionEvent, RunCounters};
use crate::pacing::PacingPolicy;

use super::executor::{UserStage, VirtualUser};
use super::profile::UserProfile;
use super::throttle::ActionThrottle;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Builder for creating VirtualUser instances
///
/// Profile-level pacing, failure threshold and exhaustion policy take
/// precedence over the run-wide values given here.
///
/// # Example
/// ```ignore
/// let user = VirtualUserBuilder::new(UserId(0))
///     .profile(profile)
///     .events_tx(tx)
///     .pacing(Arc::new(NoWait))
///     .build()?;
///
/// let report = user.run(control_rx).await?;
/// ```
pub struct VirtualUserBuilder<S> {
    id: UserId,
    profile: Option<UserProfile<S>>,
    events_tx: Option<mpsc::Sender<ActionEvent>>,
    counters: Option<Arc<RunCounters>>,
    pacing: Option<Arc<dyn PacingPolicy>>,
    throttle: Option<Arc<ActionThrottle>>,
    max_consecutive_failures: Option<u32>,
    exhaustion: ExhaustionPolicy,
    seed: Option<u64>,
}

impl<S: Send + 'static> VirtualUserBuilder<S> {
    /// Create a new builder with the given user ID
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            profile: None,
            events_tx: None,
            counters: None,
            pacing: None,
            throttle: None,
            max_consecutive_failures: None,
            exhaustion: ExhaustionPolicy::default(),
            seed: None,
        }
    }

    /// Set the profile
    pub fn profile(mut self, profile: UserProfile<S>) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Set the event channel sender
    pub fn events_tx(mut self, tx: mpsc::Sender<ActionEvent>) -> Self {
        self.events_tx = Some(tx);
        self
    }

    /// Share run counters
    pub fn counters(mut self, counters: Arc<RunCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Set the run-wide pacing
    pub fn pacing(mut self, pacing: Arc<dyn PacingPolicy>) -> Self {
        self.pacing = Some(pacing);
        self
    }

    /// Share a run-wide throttle
    pub fn throttle(mut self, throttle: Arc<ActionThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Set the run-wide failure threshold
    pub fn max_consecutive_failures(mut self, n: Option<u32>) -> Self {
        self.max_consecutive_failures = n;
        self
    }

    /// Set the run-wide exhaustion policy
    pub fn exhaustion(mut self, policy: ExhaustionPolicy) -> Self {
        self.exhaustion = policy;
        self
    }

    /// Seed the user's random generator; mixed with the user ID
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Build the VirtualUser
    ///
    /// # Errors
    /// Returns an error if the profile, the event channel or a pacing
    /// policy is missing.
    pub fn build(self) -> BenchResult<VirtualUser<S>> {
        let profile = self
            .profile
            .ok_or_else(|| BenchError::missing_config("profile"))?;
        let events_tx = self
            .events_tx
            .ok_or_else(|| BenchError::missing_config("events_tx"))?;
        let pacing = profile
            .pacing_policy()
            .cloned()
            .or(self.pacing)
            .ok_or_else(|| BenchError::missing_config("pacing"))?;

        let max_consecutive_failures = profile
            .failure_threshold()
            .or(self.max_consecutive_failures);
        let exhaustion = profile.exhaustion_policy().unwrap_or(self.exhaustion);

        let rng = match self.seed {
            Some(seed) => {
                StdRng::seed_from_u64(seed ^ self.id.0.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            }
            None => StdRng::from_entropy(),
        };

        let (stage_tx, _) = watch::channel(UserStage::Starting);

        Ok(VirtualUser {
            id: self.id,
            profile,
            events_tx,
            counters: self.counters.unwrap_or_default(),
            pacing,
            throttle: self.throttle.unwrap_or_default(),
            max_consecutive_failures,
            exhaustion,
            rng,
            stage_tx,
        })
    }
}
