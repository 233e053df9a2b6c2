//! Report generation for swarm-bench runs
//!
//! This crate provides report generators for:
//!
//! - A console summary table
//! - JSON export of the run overview and per-action metrics
//! - CSV export of the per-action summary and raw events

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod console;
pub mod csv_export;
pub mod json_export;

pub use console::print_summary;
pub use csv_export::CsvExporter;
pub use json_export::JsonExporter;

use serde::Serialize;
use swarm_bench_core::scheduler::AggregatedStats;
use swarm_bench_core::{CounterSnapshot, RunMetrics, RunSummary, StopMode, StopReason};

/// Scheduler-side view of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunOverview {
    /// Why the run ended
    pub reason: StopReason,
    /// How users were stopped
    pub stop_mode: StopMode,
    /// Run time in seconds
    pub duration_secs: f64,
    /// Largest live population
    pub peak_users: usize,
    /// Largest spawn batch in one tick
    pub max_spawn_burst: usize,
    /// Run-wide counters
    pub counters: CounterSnapshot,
    /// Totals over every user report
    pub users: AggregatedStats,
}

impl From<&RunSummary> for RunOverview {
    fn from(summary: &RunSummary) -> Self {
        Self {
            reason: summary.reason,
            stop_mode: summary.stop_mode,
            duration_secs: summary.duration.as_secs_f64(),
            peak_users: summary.peak_users,
            max_spawn_burst: summary.max_spawn_burst,
            counters: summary.counters,
            users: summary.aggregated.clone(),
        }
    }
}

/// Everything a report needs
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Scheduler view
    pub run: RunOverview,
    /// Event-stream metrics
    pub metrics: RunMetrics,
}

impl RunReport {
    /// Combine the scheduler summary with the collected metrics
    pub fn new(summary: &RunSummary, metrics: RunMetrics) -> Self {
        Self {
            run: RunOverview::from(summary),
            metrics,
        }
    }
}
