//! Per-user statistics tracking

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Statistics tracked by each virtual user
#[derive(Debug, Default, Clone)]
pub struct UserStats {
    /// Actions that returned `Ok`
    pub completed: usize,

    /// Actions that returned an error
    pub errors: usize,

    /// Current run of failures without a success in between
    pub consecutive_failures: u32,

    /// Longest run of consecutive failures seen
    pub max_consecutive_failures: u32,

    /// When the user started
    pub started_at: Option<Instant>,

    /// When the user stopped
    pub ended_at: Option<Instant>,
}

impl UserStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start time
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Record the end time
    pub fn stop(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Actions executed (completed + errors)
    pub fn total_actions(&self) -> usize {
        self.completed + self.errors
    }

    /// Success ratio (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.total_actions() == 0 {
            0.0
        } else {
            self.completed as f64 / self.total_actions() as f64
        }
    }

    /// Error ratio (0.0 - 1.0)
    pub fn error_rate(&self) -> f64 {
        if self.total_actions() == 0 {
            0.0
        } else {
            self.errors as f64 / self.total_actions() as f64
        }
    }

    /// Time since start, or the full lifetime once stopped
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            self.ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }

    /// Actions per second over the user's lifetime
    pub fn actions_per_second(&self) -> f64 {
        self.elapsed()
            .map(|d| {
                let secs = d.as_secs_f64();
                if secs > 0.0 {
                    self.total_actions() as f64 / secs
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0)
    }

    /// Record a successful action
    pub fn record_success(&mut self) {
        self.completed += 1;
        self.consecutive_failures = 0;
    }

    /// Record a failed action
    pub fn record_failure(&mut self) {
        self.errors += 1;
        self.consecutive_failures += 1;
        self.max_consecutive_failures =
            self.max_consecutive_failures.max(self.consecutive_failures);
    }

    /// Merge counts from another user
    pub fn merge(&mut self, other: &UserStats) {
        self.completed += other.completed;
        self.errors += other.errors;
        self.max_consecutive_failures = self
            .max_consecutive_failures
            .max(other.max_consecutive_failures);
    }
}

/// Why a user left the population
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserExit {
    /// Graceful stop: the last action finished and the stop hook ran
    Stopped,
    /// Immediate stop: the in-flight action was abandoned
    Cancelled,
    /// Nothing selectable was left under the root
    Exhausted,
    /// Too many consecutive action failures
    FailureThreshold,
}

/// Final report of one user
#[derive(Debug, Clone)]
pub struct UserReport {
    /// User identifier
    pub id: crate::context::UserId,
    /// Profile name
    pub profile: String,
    /// Counters
    pub stats: UserStats,
    /// Exit reason
    pub exit: UserExit,
}
