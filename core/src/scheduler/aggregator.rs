//! Result aggregation from finished users

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::user::{UserExit, UserReport};

/// Aggregated statistics from all finished users
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedStats {
    /// Number of users that reported
    pub total_users: usize,

    /// Total successful actions
    pub total_completed: usize,

    /// Total failed actions
    pub total_errors: usize,

    /// Longest lifetime across all users
    pub total_duration: Duration,

    /// Overall actions per second
    pub actions_per_second: f64,

    /// Longest failure streak seen by any user
    pub max_consecutive_failures: u32,

    /// Users per exit reason
    pub exits: BTreeMap<String, usize>,

    /// Users per profile
    pub profiles: BTreeMap<String, usize>,
}

impl AggregatedStats {
    /// Get the total number of actions (completed + errors)
    pub fn total_actions(&self) -> usize {
        self.total_completed + self.total_errors
    }

    /// Get the success rate (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        let total = self.total_actions();
        if total > 0 {
            self.total_completed as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Get the error rate (0.0 - 1.0)
    pub fn error_rate(&self) -> f64 {
        let total = self.total_actions();
        if total > 0 {
            self.total_errors as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Users that left for the given reason
    pub fn exited(&self, exit: UserExit) -> usize {
        self.exits.get(exit_label(exit)).copied().unwrap_or(0)
    }
}

fn exit_label(exit: UserExit) -> &'static str {
    match exit {
        UserExit::Stopped => "stopped",
        UserExit::Cancelled => "cancelled",
        UserExit::Exhausted => "exhausted",
        UserExit::FailureThreshold => "failure_threshold",
    }
}

/// Aggregate the final reports of multiple users
pub fn aggregate_user_reports(reports: &[UserReport]) -> AggregatedStats {
    if reports.is_empty() {
        return AggregatedStats::default();
    }

    let total_completed: usize = reports.iter().map(|r| r.stats.completed).sum();
    let total_errors: usize = reports.iter().map(|r| r.stats.errors).sum();

    // Use the maximum lifetime across all users
    let total_duration = reports
        .iter()
        .filter_map(|r| r.stats.elapsed())
        .max()
        .unwrap_or(Duration::ZERO);

    let secs = total_duration.as_secs_f64();
    let actions_per_second = if secs > 0.0 {
        (total_completed + total_errors) as f64 / secs
    } else {
        0.0
    };

    let mut exits = BTreeMap::new();
    let mut profiles = BTreeMap::new();
    for report in reports {
        *exits.entry(exit_label(report.exit).to_string()).or_insert(0) += 1;
        *profiles.entry(report.profile.clone()).or_insert(0) += 1;
    }

    AggregatedStats {
        total_users: reports.len(),
        total_completed,
        total_errors,
        total_duration,
        actions_per_second,
        max_consecutive_failures: reports
            .iter()
            .map(|r| r.stats.max_consecutive_failures)
            .max()
            .unwrap_or(0),
        exits,
        profiles,
    }
}
