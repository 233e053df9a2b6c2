//! Action events, live counters and aggregated run metrics

use crate::context::UserId;
use crate::error::{ActionError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// One executed action, as emitted by a virtual user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    /// User that ran the action
    pub user_id: UserId,
    /// Profile of that user
    pub profile: Arc<str>,
    /// Action name
    pub action: Arc<str>,
    /// Wall-clock start of the action
    pub started_at: DateTime<Utc>,
    /// Time spent in the callback (ms)
    pub duration_ms: f64,
    /// Whether the callback returned `Ok`
    pub success: bool,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure classification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ActionEvent {
    /// Build an event from the outcome of one callback
    pub fn new(
        user_id: UserId,
        profile: Arc<str>,
        action: Arc<str>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        outcome: &Result<(), ActionError>,
    ) -> Self {
        let (error, error_kind) = match outcome {
            Ok(()) => (None, None),
            Err(e) => (Some(e.to_string()), Some(e.kind())),
        };
        Self {
            user_id,
            profile,
            action,
            started_at,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
            success: outcome.is_ok(),
            error,
            error_kind,
        }
    }
}

// ============================================================================
// Live counters
// ============================================================================

/// Run-wide counters shared by the scheduler and every user
///
/// Updated with relaxed atomics; readers get a consistent-enough view for
/// progress display and stop conditions.
#[derive(Debug, Default)]
pub struct RunCounters {
    spawned: AtomicU64,
    active: AtomicU64,
    startup_failures: AtomicU64,
    finished: AtomicU64,
    actions: AtomicU64,
    failures: AtomicU64,
    started: Notify,
}

impl RunCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn user_spawned(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn user_started(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.started.notify_one();
    }

    /// Resolves after at least one user got past its start hook
    ///
    /// Starts since the last call coalesce into one wakeup.
    pub(crate) async fn wait_user_started(&self) {
        self.started.notified().await;
    }

    pub(crate) fn user_start_failed(&self) {
        self.startup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn user_finished(&self, was_active: bool) {
        if was_active {
            self.active.fetch_sub(1, Ordering::Relaxed);
        }
        self.finished.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_action(&self, success: bool) {
        self.actions.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Actions executed so far, successful or not
    pub fn actions(&self) -> u64 {
        self.actions.load(Ordering::Relaxed)
    }

    /// Users currently past their start hook
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Copy of every counter
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            spawned: self.spawned.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            startup_failures: self.startup_failures.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            actions: self.actions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RunCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Users spawned so far
    pub spawned: u64,
    /// Users in the running stage
    pub active: u64,
    /// Users whose start hook failed
    pub startup_failures: u64,
    /// Users that left the population
    pub finished: u64,
    /// Actions executed
    pub actions: u64,
    /// Actions that failed
    pub failures: u64,
}

// ============================================================================
// Aggregated metrics
// ============================================================================

/// Aggregated metrics of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    /// When collection started
    pub started_at: DateTime<Utc>,
    /// When the event stream closed
    pub ended_at: DateTime<Utc>,
    /// Totals across all actions
    pub summary: MetricsSummary,
    /// Per-action breakdown, keyed by action name
    pub actions: BTreeMap<String, ActionMetrics>,
    /// Raw events, when retained
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ActionEvent>,
}

/// Totals across all actions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Actions executed
    pub total_requests: u64,
    /// Successful actions
    pub successful_requests: u64,
    /// Failed actions
    pub failed_requests: u64,
    /// Failure ratio (0.0 - 1.0)
    pub error_rate: f64,
    /// Actions per second over the collection window
    pub requests_per_second: f64,
    /// Action latency (ms)
    pub latency: LatencyPercentiles,
    /// Failures by classification
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<ErrorKind, u64>,
    /// Collection window in seconds
    pub total_duration_secs: f64,
}

/// Metrics of one action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionMetrics {
    /// Action name
    pub name: String,
    /// Times executed
    pub requests: u64,
    /// Failed executions
    pub failures: u64,
    /// Failure ratio (0.0 - 1.0)
    pub error_rate: f64,
    /// Executions per second over the collection window
    pub requests_per_second: f64,
    /// Latency (ms)
    pub latency: LatencyPercentiles,
    /// Failures by classification
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<ErrorKind, u64>,
}

/// Latency percentiles (all values in milliseconds)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct LatencyPercentiles {
    /// Minimum value
    pub min: f64,
    /// 50th percentile (median)
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Maximum value
    pub max: f64,
    /// Mean value
    pub mean: f64,
    /// Standard deviation
    pub stddev: f64,
}

const MAX_LATENCY_MICROS: u64 = 3_600_000_000;

/// HDR histogram of latencies with microsecond precision, up to one hour
pub struct LatencyHistogram {
    // Constant bounds, so creation only fails on a broken hdrhistogram build;
    // recording is skipped in that case.
    histogram: Option<hdrhistogram::Histogram<u64>>,
}

impl LatencyHistogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        Self {
            histogram: hdrhistogram::Histogram::new_with_bounds(1, MAX_LATENCY_MICROS, 3).ok(),
        }
    }

    /// Record a value in milliseconds
    pub fn record_ms(&mut self, ms: f64) {
        let micros = (ms * 1000.0) as u64;
        if let Some(h) = self.histogram.as_mut() {
            let _ = h.record(micros.clamp(1, MAX_LATENCY_MICROS));
        }
    }

    /// Number of recorded values
    pub fn len(&self) -> u64 {
        self.histogram.as_ref().map_or(0, |h| h.len())
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Percentiles of the recorded values
    pub fn percentiles(&self) -> LatencyPercentiles {
        let Some(h) = self.histogram.as_ref().filter(|h| !h.is_empty()) else {
            return LatencyPercentiles::default();
        };

        LatencyPercentiles {
            min: h.min() as f64 / 1000.0,
            p50: h.value_at_quantile(0.50) as f64 / 1000.0,
            p75: h.value_at_quantile(0.75) as f64 / 1000.0,
            p90: h.value_at_quantile(0.90) as f64 / 1000.0,
            p95: h.value_at_quantile(0.95) as f64 / 1000.0,
            p99: h.value_at_quantile(0.99) as f64 / 1000.0,
            max: h.max() as f64 / 1000.0,
            mean: h.mean() / 1000.0,
            stddev: h.stdev() / 1000.0,
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct ActionAccumulator {
    requests: u64,
    failures: u64,
    histogram: LatencyHistogram,
    errors: BTreeMap<ErrorKind, u64>,
}

impl ActionAccumulator {
    fn record(&mut self, event: &ActionEvent) {
        self.requests += 1;
        self.histogram.record_ms(event.duration_ms);
        if !event.success {
            self.failures += 1;
            let kind = event.error_kind.unwrap_or(ErrorKind::Unknown);
            *self.errors.entry(kind).or_insert(0) += 1;
        }
    }

    fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        }
    }
}

fn per_second(count: u64, secs: f64) -> f64 {
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Folds the event stream into [`RunMetrics`]
pub struct MetricsCollector {
    started_at: DateTime<Utc>,
    keep_events: bool,
    overall: ActionAccumulator,
    actions: BTreeMap<String, ActionAccumulator>,
    events: Vec<ActionEvent>,
}

impl MetricsCollector {
    /// Create a collector; raw events are retained when `keep_events` is set
    pub fn new(keep_events: bool) -> Self {
        Self {
            started_at: Utc::now(),
            keep_events,
            overall: ActionAccumulator::default(),
            actions: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Fold one event
    pub fn record(&mut self, event: ActionEvent) {
        self.overall.record(&event);
        self.actions
            .entry(event.action.to_string())
            .or_default()
            .record(&event);
        if self.keep_events {
            self.events.push(event);
        }
    }

    /// Number of events folded so far
    pub fn len(&self) -> u64 {
        self.overall.requests
    }

    /// Whether no event was folded yet
    pub fn is_empty(&self) -> bool {
        self.overall.requests == 0
    }

    /// Produce the final metrics over a collection window of `duration`
    pub fn finish(self, duration: Duration) -> RunMetrics {
        let secs = duration.as_secs_f64();
        let summary = MetricsSummary {
            total_requests: self.overall.requests,
            successful_requests: self.overall.requests - self.overall.failures,
            failed_requests: self.overall.failures,
            error_rate: self.overall.error_rate(),
            requests_per_second: per_second(self.overall.requests, secs),
            latency: self.overall.histogram.percentiles(),
            errors: self.overall.errors.clone(),
            total_duration_secs: secs,
        };

        let actions = self
            .actions
            .into_iter()
            .map(|(name, acc)| {
                let metrics = ActionMetrics {
                    name: name.clone(),
                    requests: acc.requests,
                    failures: acc.failures,
                    error_rate: acc.error_rate(),
                    requests_per_second: per_second(acc.requests, secs),
                    latency: acc.histogram.percentiles(),
                    errors: acc.errors,
                };
                (name, metrics)
            })
            .collect();

        RunMetrics {
            started_at: self.started_at,
            ended_at: Utc::now(),
            summary,
            actions,
            events: self.events,
        }
    }
}

/// Spawn the aggregator task
///
/// It drains `rx` until every sender is dropped (the scheduler and all its
/// users are gone) and resolves to the aggregated metrics.
pub fn spawn_collector(
    mut rx: mpsc::Receiver<ActionEvent>,
    keep_events: bool,
) -> JoinHandle<RunMetrics> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now();
        let mut collector = MetricsCollector::new(keep_events);
        while let Some(event) = rx.recv().await {
            collector.record(event);
        }
        tracing::debug!(events = collector.len(), "Event stream closed");
        collector.finish(start.elapsed())
    })
}
