//! Run configuration types

use crate::pacing::PacingConfig;
use crate::taskset::TagFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Run configuration
///
/// Supplied once at startup and immutable for the duration of a run.
/// Durations are written as fractional seconds when (de)serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Population to ramp to when the run starts
    pub users: usize,

    /// Duration over which the initial population is spawned
    #[serde(with = "duration_secs")]
    pub ramp: Duration,

    /// Optional ramp stages applied one after another after the initial ramp
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,

    /// When the run ends on its own
    pub stop_condition: StopCondition,

    /// Default think time between actions (profiles may override)
    pub pacing: PacingConfig,

    /// Maximum number of users spawned or despawned in one scheduler tick
    pub max_burst: usize,

    /// Scheduler tick interval
    #[serde(with = "duration_secs")]
    pub tick: Duration,

    /// How users are stopped when the run ends on its own
    pub stop_mode: StopMode,

    /// Upper bound on a graceful stop before in-flight actions are abandoned
    #[serde(
        with = "option_duration_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub stop_timeout: Option<Duration>,

    /// Consecutive action failures after which a user stops itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,

    /// What happens when a single-shot sequence runs out
    pub exhaustion: ExhaustionPolicy,

    /// Optional run-wide throttle (actions per second across all users)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<f64>,

    /// Restrict the task trees to actions carrying these tags
    pub tags: TagFilter,

    /// Seed for per-user random generators; entropy when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            users: 1,
            ramp: Duration::ZERO,
            stages: Vec::new(),
            stop_condition: StopCondition::default(),
            pacing: PacingConfig::default(),
            max_burst: 50,
            tick: Duration::from_millis(100),
            stop_mode: StopMode::Graceful,
            stop_timeout: None,
            max_consecutive_failures: None,
            exhaustion: ExhaustionPolicy::default(),
            rate_limit: None,
            tags: TagFilter::default(),
            seed: None,
        }
    }
}

impl RunConfig {
    /// Create a new config ramping to `users` immediately
    pub fn new(users: usize) -> Self {
        Self {
            users,
            ..Default::default()
        }
    }

    /// Load a config from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Set the ramp duration of the initial population
    pub fn with_ramp(mut self, ramp: Duration) -> Self {
        self.ramp = ramp;
        self
    }

    /// Append ramp stages
    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = stages;
        self
    }

    /// Set the stop condition
    pub fn with_stop_condition(mut self, stop: StopCondition) -> Self {
        self.stop_condition = stop;
        self
    }

    /// Set the default pacing
    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    /// Set the spawn burst cap
    pub fn with_max_burst(mut self, max_burst: usize) -> Self {
        self.max_burst = max_burst;
        self
    }

    /// Set the scheduler tick
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Set the stop mode used when the run ends on its own
    pub fn with_stop_mode(mut self, mode: StopMode) -> Self {
        self.stop_mode = mode;
        self
    }

    /// Bound graceful stops
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    /// Set the consecutive failure threshold
    pub fn with_max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = Some(n);
        self
    }

    /// Set the exhaustion policy
    pub fn with_exhaustion(mut self, policy: ExhaustionPolicy) -> Self {
        self.exhaustion = policy;
        self
    }

    /// Set the run-wide rate limit
    pub fn with_rate_limit(mut self, rps: f64) -> Self {
        self.rate_limit = Some(rps);
        self
    }

    /// Set the tag filter
    pub fn with_tags(mut self, tags: TagFilter) -> Self {
        self.tags = tags;
        self
    }

    /// Seed per-user random generators
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_burst == 0 {
            return Err(ConfigError::InvalidPopulation(
                "max burst must be at least 1".into(),
            ));
        }

        if self.tick.is_zero() {
            return Err(ConfigError::InvalidPopulation(
                "scheduler tick must be positive".into(),
            ));
        }

        if self.users == 0 && self.stages.iter().all(|s| s.users == 0) {
            // A run with no users at all is only useful when driven externally.
            if !matches!(self.stop_condition, StopCondition::Indefinite) {
                return Err(ConfigError::InvalidPopulation(
                    "at least one stage or the initial population must have users".into(),
                ));
            }
        }

        if let Some(rps) = self.rate_limit {
            if !rps.is_finite() || rps <= 0.0 {
                return Err(ConfigError::InvalidRateLimit(format!(
                    "rate limit must be a positive number, got {}",
                    rps
                )));
            }
        }

        match self.stop_condition {
            StopCondition::RequestCount(0) => {
                return Err(ConfigError::InvalidStopCondition(
                    "request count must be at least 1".into(),
                ));
            }
            StopCondition::Duration(d) if d.is_zero() => {
                return Err(ConfigError::InvalidStopCondition(
                    "run time must be positive".into(),
                ));
            }
            _ => {}
        }

        if self.max_consecutive_failures == Some(0) {
            return Err(ConfigError::InvalidThreshold(
                "consecutive failure threshold must be at least 1".into(),
            ));
        }

        self.pacing.validate()?;
        Ok(())
    }
}

/// One ramp step: move the population to `users` over `duration`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Time spent ramping (and holding) in this stage
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    /// Population target of this stage
    pub users: usize,
}

impl Stage {
    /// Ramp to `users` over `duration`
    pub fn new(duration: Duration, users: usize) -> Self {
        Self { duration, users }
    }
}

/// Run stop condition, evaluated by the scheduler only
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCondition {
    /// Stop once this many actions were executed across all users
    RequestCount(u64),

    /// Stop after the given run time
    Duration(#[serde(with = "duration_secs")] Duration),

    /// Run until stopped externally (or until every user finished)
    Indefinite,
}

impl Default for StopCondition {
    fn default() -> Self {
        StopCondition::Indefinite
    }
}

/// How users are stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Let the in-flight action finish, then run the stop hook
    #[default]
    Graceful,
    /// Abandon the in-flight action without running the stop hook
    Immediate,
}

/// Behavior when a single-shot sequential task set is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// The enclosing weighted set stops selecting it; the user stops only
    /// when nothing selectable is left under its root
    #[default]
    Absorb,
    /// The user stops as soon as any single-shot sequence is exhausted
    StopUser,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Weight outside the allowed range
    #[error("invalid weight {weight} for '{name}': weights must be at least 1")]
    InvalidWeight {
        /// Node the weight was given for
        name: String,
        /// Rejected weight
        weight: u32,
    },

    /// Task set without children
    #[error("task set '{0}' has no children")]
    EmptyTaskSet(String),

    /// Task set reachable from itself
    #[error("task set cycle: {0}")]
    Cycle(String),

    /// Name registered twice
    #[error("duplicate name '{0}'")]
    DuplicateName(String),

    /// Reference to a node that does not exist
    #[error("unknown task node '{0}'")]
    UnknownNode(String),

    /// Tag filter left nothing to run
    #[error("no actions match the tag filter: {0}")]
    NoMatchingActions(String),

    /// No user profile registered
    #[error("at least one user profile is required")]
    NoProfiles,

    /// Invalid pacing bounds
    #[error("invalid pacing: {0}")]
    InvalidPacing(String),

    /// Invalid population settings
    #[error("invalid population: {0}")]
    InvalidPopulation(String),

    /// Invalid rate limit
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),

    /// Invalid stop condition
    #[error("invalid stop condition: {0}")]
    InvalidStopCondition(String),

    /// Invalid failure threshold
    #[error("invalid failure threshold: {0}")]
    InvalidThreshold(String),

    /// Invalid channel sizing
    #[error("invalid channel config: {0}")]
    InvalidChannel(String),

    /// Config file could not be read or parsed
    #[error("cannot load configuration: {0}")]
    Parse(String),
}

/// Serialize a `Duration` as fractional seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as seconds
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    /// Deserialize from seconds
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Serialize an `Option<Duration>` as fractional seconds
pub mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as seconds or null
    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    /// Deserialize from seconds or null
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
