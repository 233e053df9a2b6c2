//! Builder pattern for Scheduler construction

use tokio::sync::mpsc;

use crate::channel::ChannelConfig;
use crate::config::{ConfigError, RunConfig, StopCondition};
use crate::error::BenchResult;
use crate::metrics::ActionEvent;
use crate::user::UserProfile;

use super::executor::Scheduler;

/// Builder for creating a Scheduler with proper configuration
///
/// # Example
///
/// ```ignore
/// let (scheduler, events_rx) = SchedulerBuilder::new()
///     .users(50)
///     .ramp(Duration::from_secs(10))
///     .stop_condition(StopCondition::Duration(Duration::from_secs(60)))
///     .profile(profile)
///     .build()?;
///
/// let summary = scheduler.run_with_signal_handling().await?;
/// ```
pub struct SchedulerBuilder<S> {
    config: RunConfig,
    profiles: Vec<UserProfile<S>>,
    channel_config: ChannelConfig,
}

impl<S: Send + 'static> SchedulerBuilder<S> {
    /// Create a new scheduler builder with default configuration
    pub fn new() -> Self {
        Self {
            config: RunConfig::default(),
            profiles: Vec::new(),
            channel_config: ChannelConfig::default(),
        }
    }

    /// Set the full run configuration
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the initial population
    pub fn users(mut self, users: usize) -> Self {
        self.config.users = users;
        self
    }

    /// Set the ramp duration of the initial population
    pub fn ramp(mut self, ramp: std::time::Duration) -> Self {
        self.config.ramp = ramp;
        self
    }

    /// Set the stop condition
    pub fn stop_condition(mut self, stop: StopCondition) -> Self {
        self.config.stop_condition = stop;
        self
    }

    /// Add a user profile
    pub fn profile(mut self, profile: UserProfile<S>) -> Self {
        self.profiles.push(profile);
        self
    }

    /// Add several user profiles
    pub fn profiles(mut self, profiles: impl IntoIterator<Item = UserProfile<S>>) -> Self {
        self.profiles.extend(profiles);
        self
    }

    /// Set the channel configuration
    pub fn channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = config;
        self
    }

    /// Build the scheduler and return it along with the event receiver
    ///
    /// # Errors
    ///
    /// Returns an error if no profile was added, if configuration or profile
    /// validation fails, or if the tag filter leaves no profile anything to
    /// run. Profiles with no matching action are dropped from the mix.
    pub fn build(self) -> BenchResult<(Scheduler<S>, mpsc::Receiver<ActionEvent>)> {
        self.config.validate()?;
        self.channel_config.validate()?;

        if self.profiles.is_empty() {
            return Err(ConfigError::NoProfiles.into());
        }
        for profile in &self.profiles {
            profile.validate()?;
        }

        let profiles: Vec<UserProfile<S>> = self
            .profiles
            .iter()
            .filter_map(|profile| {
                let restricted = profile.restricted(&self.config.tags);
                if restricted.is_none() {
                    tracing::warn!(
                        profile = profile.name(),
                        "No action matches the tag filter, dropping profile"
                    );
                }
                restricted
            })
            .collect();

        if profiles.is_empty() {
            return Err(ConfigError::NoMatchingActions(format!(
                "include {:?}, exclude {:?}",
                self.config.tags.include, self.config.tags.exclude
            ))
            .into());
        }

        let pacing = self.config.pacing.build()?;
        let (events_tx, events_rx) = mpsc::channel(self.channel_config.events_buffer);
        let scheduler = Scheduler::new(self.config, profiles, pacing, events_tx);

        Ok((scheduler, events_rx))
    }
}

impl<S: Send + 'static> Default for SchedulerBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}
