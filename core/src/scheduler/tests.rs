//! Tests for the Scheduler module

use super::aggregator::aggregate_user_reports;
use super::builder::SchedulerBuilder;
use super::executor::{RunSummary, StopReason};
use crate::config::{ConfigError, RunConfig, Stage, StopCondition, StopMode};
use crate::context::{UserContext, UserId};
use crate::error::{ActionError, ActionResult, BenchError};
use crate::channel::ChannelConfig;
use crate::metrics::spawn_collector;
use crate::pacing::PacingConfig;
use crate::taskset::{ActionDef, TagFilter, TaskSetMode, TaskTreeBuilder};
use crate::traits::UserAction;
use crate::user::{UserExit, UserProfile, UserReport, UserStats};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

// ============================================================================
// Test actions
// ============================================================================

struct Succeed;

#[async_trait]
impl UserAction<()> for Succeed {
    async fn call(&self, _ctx: &mut UserContext<()>) -> ActionResult {
        Ok(())
    }
}

struct Sleep(Duration);

#[async_trait]
impl UserAction<()> for Sleep {
    async fn call(&self, _ctx: &mut UserContext<()>) -> ActionResult {
        sleep(self.0).await;
        Ok(())
    }
}

/// Start hook rejecting users whose ID matches the predicate
struct RejectUsers(fn(UserId) -> bool);

#[async_trait]
impl UserAction<()> for RejectUsers {
    async fn call(&self, ctx: &mut UserContext<()>) -> ActionResult {
        if (self.0)(ctx.user_id()) {
            Err(ActionError::status(401, "rejected"))
        } else {
            Ok(())
        }
    }
}

struct Panic;

#[async_trait]
impl UserAction<()> for Panic {
    async fn call(&self, _ctx: &mut UserContext<()>) -> ActionResult {
        panic!("boom");
    }
}

#[derive(Clone, Default)]
struct Count(Arc<AtomicUsize>);

#[async_trait]
impl UserAction<()> for Count {
    async fn call(&self, _ctx: &mut UserContext<()>) -> ActionResult {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn profile_of(
    name: &str,
    mode: TaskSetMode,
    tags: &[&str],
    action: impl UserAction<()> + 'static,
) -> UserProfile<()> {
    let mut builder = TaskTreeBuilder::new();
    let work = builder
        .register(ActionDef::new("work", action).tags(tags.iter().copied()))
        .unwrap();
    let root = builder.task_set("root", mode).unwrap();
    builder.add(root, work).unwrap();
    UserProfile::new(name, Arc::new(builder.build().unwrap()), root)
}

fn looping(action: impl UserAction<()> + 'static) -> UserProfile<()> {
    profile_of("looping", TaskSetMode::Weighted, &[], action)
}

fn paced(users: usize) -> RunConfig {
    RunConfig::new(users).with_pacing(PacingConfig::Constant {
        delay: Duration::from_secs(1),
    })
}

async fn run_to_end(config: RunConfig, profiles: Vec<UserProfile<()>>) -> RunSummary {
    let (scheduler, events_rx) = SchedulerBuilder::new()
        .config(config)
        .profiles(profiles)
        .build()
        .unwrap();
    let collector = spawn_collector(events_rx, false);
    let summary = scheduler.run().await.unwrap();
    collector.await.unwrap();
    summary
}

fn exits(summary: &RunSummary) -> Vec<(u64, UserExit)> {
    let mut exits: Vec<(u64, UserExit)> =
        summary.reports.iter().map(|r| (r.id.0, r.exit)).collect();
    exits.sort_by_key(|(id, _)| *id);
    exits
}

// ============================================================================
// Ramping
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_ramp_spreads_spawns_over_duration() {
    let config = paced(100)
        .with_ramp(Duration::from_secs(10))
        .with_max_burst(5);
    let (scheduler, events_rx) = SchedulerBuilder::new()
        .config(config)
        .profile(looping(Succeed))
        .build()
        .unwrap();
    let _collector = spawn_collector(events_rx, false);
    let (handle, run) = scheduler.start();

    sleep(Duration::from_millis(5_050)).await;
    let halfway = handle.population();
    assert!((45..=55).contains(&halfway), "halfway population {}", halfway);

    sleep(Duration::from_secs(5)).await;
    assert!(handle.population() >= 90);

    sleep(Duration::from_secs(1)).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.population.users, 100);
    assert_eq!(snapshot.population.target, 100);
    assert!(!snapshot.population.ramping);
    assert_eq!(snapshot.counters.spawned, 100);

    handle.stop(StopMode::Immediate).unwrap();
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.reason, StopReason::External);
    assert_eq!(summary.peak_users, 100);
    assert!(summary.max_spawn_burst <= 5);
    assert_eq!(summary.reports.len(), 100);
}

#[tokio::test(start_paused = true)]
async fn test_users_in_start_hook_are_not_counted() {
    let profile = looping(Succeed).on_start(Sleep(Duration::from_secs(10)));
    let (scheduler, events_rx) = SchedulerBuilder::new()
        .config(paced(3))
        .profile(profile)
        .build()
        .unwrap();
    let _collector = spawn_collector(events_rx, false);
    let (handle, run) = scheduler.start();

    sleep(Duration::from_secs(1)).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.population.users, 0);
    assert_eq!(snapshot.population.target, 3);
    assert_eq!(snapshot.counters.spawned, 3);
    assert_eq!(snapshot.counters.active, 0);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(handle.population(), 3);

    handle.stop(StopMode::Immediate).unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_burst_cap_limits_spawns_per_tick() {
    let config = paced(30)
        .with_max_burst(10)
        .with_tick(Duration::from_millis(100));
    let (scheduler, events_rx) = SchedulerBuilder::new()
        .config(config)
        .profile(looping(Succeed))
        .build()
        .unwrap();
    let _collector = spawn_collector(events_rx, false);
    let (handle, run) = scheduler.start();

    sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.population(), 10);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.population(), 30);

    handle.stop(StopMode::Immediate).unwrap();
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.max_spawn_burst, 10);
}

#[tokio::test(start_paused = true)]
async fn test_ramp_down_despawns_newest_first() {
    let (scheduler, events_rx) = SchedulerBuilder::new()
        .config(paced(5))
        .profile(looping(Succeed))
        .build()
        .unwrap();
    let _collector = spawn_collector(events_rx, false);
    let (handle, run) = scheduler.start();

    sleep(Duration::from_millis(500)).await;
    assert_eq!(handle.population(), 5);

    handle.ramp_to(2, Duration::ZERO).unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.population(), 2);
    assert_eq!(handle.snapshot().population.stopping, 0);

    handle.stop(StopMode::Immediate).unwrap();
    let summary = run.await.unwrap().unwrap();
    assert_eq!(
        exits(&summary),
        vec![
            (0, UserExit::Cancelled),
            (1, UserExit::Cancelled),
            (2, UserExit::Stopped),
            (3, UserExit::Stopped),
            (4, UserExit::Stopped),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stages_run_in_order() {
    let config = paced(0)
        .with_stages(vec![
            Stage::new(Duration::from_secs(2), 4),
            Stage::new(Duration::from_secs(2), 0),
        ])
        .with_stop_condition(StopCondition::Duration(Duration::from_secs(60)));

    let start = Instant::now();
    let summary = run_to_end(config, vec![looping(Succeed)]).await;

    assert_eq!(summary.reason, StopReason::StagesComplete);
    assert_eq!(summary.peak_users, 4);
    assert_eq!(summary.reports.len(), 4);
    assert!(summary.reports.iter().all(|r| r.exit == UserExit::Stopped));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_profile_mix_follows_weights() {
    let heavy = profile_of("heavy", TaskSetMode::Weighted, &[], Succeed).weight(3);
    let light = profile_of("light", TaskSetMode::Weighted, &[], Succeed);

    let (scheduler, events_rx) = SchedulerBuilder::new()
        .config(paced(8))
        .profiles([heavy, light])
        .build()
        .unwrap();
    let _collector = spawn_collector(events_rx, false);
    let (handle, run) = scheduler.start();

    sleep(Duration::from_millis(500)).await;
    handle.stop(StopMode::Immediate).unwrap();
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.aggregated.profiles.get("heavy"), Some(&6));
    assert_eq!(summary.aggregated.profiles.get("light"), Some(&2));
}

// ============================================================================
// Stopping
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_immediate_stop_cancels_in_flight_actions() {
    let (scheduler, events_rx) = SchedulerBuilder::new()
        .config(paced(5))
        .profile(looping(Sleep(Duration::from_secs(60))))
        .build()
        .unwrap();
    let collector = spawn_collector(events_rx, false);
    let (handle, run) = scheduler.start();

    sleep(Duration::from_secs(1)).await;
    let stop_at = Instant::now();
    handle.stop(StopMode::Immediate).unwrap();
    let summary = run.await.unwrap().unwrap();

    assert!(stop_at.elapsed() < Duration::from_millis(50));
    assert_eq!(summary.stop_mode, StopMode::Immediate);
    assert_eq!(summary.counters.actions, 0);
    assert!(summary.reports.iter().all(|r| r.exit == UserExit::Cancelled));

    let metrics = collector.await.unwrap();
    assert_eq!(metrics.summary.total_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_waits_for_in_flight_actions() {
    let stops = Count::default();
    let profile = looping(Sleep(Duration::from_secs(3))).on_stop(stops.clone());

    let (scheduler, events_rx) = SchedulerBuilder::new()
        .config(paced(5))
        .profile(profile)
        .build()
        .unwrap();
    let collector = spawn_collector(events_rx, false);
    let (handle, run) = scheduler.start();

    sleep(Duration::from_secs(1)).await;
    let stop_at = Instant::now();
    handle.stop(StopMode::Graceful).unwrap();
    let summary = run.await.unwrap().unwrap();

    assert!(stop_at.elapsed() >= Duration::from_secs(2));
    assert_eq!(summary.counters.actions, 5);
    assert_eq!(stops.0.load(Ordering::SeqCst), 5);
    assert!(summary
        .reports
        .iter()
        .all(|r| r.exit == UserExit::Stopped && r.stats.completed == 1));

    let metrics = collector.await.unwrap();
    assert_eq!(metrics.summary.total_requests, 5);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_timeout_escalates() {
    let config = paced(3).with_stop_timeout(Duration::from_secs(1));
    let (scheduler, events_rx) = SchedulerBuilder::new()
        .config(config)
        .profile(looping(Sleep(Duration::from_secs(60))))
        .build()
        .unwrap();
    let _collector = spawn_collector(events_rx, false);
    let (handle, run) = scheduler.start();

    sleep(Duration::from_secs(1)).await;
    let stop_at = Instant::now();
    handle.stop(StopMode::Graceful).unwrap();
    let summary = run.await.unwrap().unwrap();

    let waited = stop_at.elapsed();
    assert!(waited >= Duration::from_secs(1) && waited < Duration::from_millis(1_100));
    assert!(summary.reports.iter().all(|r| r.exit == UserExit::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_second_stop_escalates_to_immediate() {
    let (scheduler, events_rx) = SchedulerBuilder::new()
        .config(paced(3))
        .profile(looping(Sleep(Duration::from_secs(60))))
        .build()
        .unwrap();
    let _collector = spawn_collector(events_rx, false);
    let (handle, run) = scheduler.start();

    sleep(Duration::from_secs(1)).await;
    handle.stop(StopMode::Graceful).unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.snapshot().population.stopping, 3);

    handle.stop(StopMode::Immediate).unwrap();
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.stop_mode, StopMode::Graceful);
    assert!(summary.reports.iter().all(|r| r.exit == UserExit::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_time_limit_stops_run() {
    let config = paced(4).with_stop_condition(StopCondition::Duration(Duration::from_secs(5)));

    let start = Instant::now();
    let summary = run_to_end(config, vec![looping(Succeed)]).await;

    assert_eq!(summary.reason, StopReason::TimeLimit);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_millis(5_300));
    assert!(summary.reports.iter().all(|r| r.exit == UserExit::Stopped));
    // One action per second per user
    assert!(summary.counters.actions >= 20);
}

#[tokio::test(start_paused = true)]
async fn test_request_count_stops_run() {
    let config = RunConfig::new(4)
        .with_pacing(PacingConfig::Constant {
            delay: Duration::from_millis(10),
        })
        .with_stop_condition(StopCondition::RequestCount(100));

    let summary = run_to_end(config, vec![looping(Succeed)]).await;

    assert_eq!(summary.reason, StopReason::RequestLimit);
    assert!(summary.counters.actions >= 100);
    assert_eq!(
        summary.aggregated.total_actions() as u64,
        summary.counters.actions
    );
}

#[tokio::test(start_paused = true)]
async fn test_all_users_finished_ends_run() {
    let once = profile_of("once", TaskSetMode::SequentialOnce, &[], Succeed);

    let summary = run_to_end(paced(3), vec![once]).await;

    assert_eq!(summary.reason, StopReason::AllUsersFinished);
    assert_eq!(summary.counters.actions, 3);
    assert!(summary.reports.iter().all(|r| r.exit == UserExit::Exhausted));
}

// ============================================================================
// Startup failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_all_startup_failures_are_fatal() {
    let profile = looping(Succeed).on_start(RejectUsers(|_| true));
    let (scheduler, events_rx) = SchedulerBuilder::new()
        .config(paced(3))
        .profile(profile)
        .build()
        .unwrap();
    let _collector = spawn_collector(events_rx, false);

    let err = scheduler.run().await.unwrap_err();
    assert!(matches!(err, BenchError::SchedulerFatal(_)));
}

#[tokio::test(start_paused = true)]
async fn test_partial_startup_failures_are_discarded() {
    let profile = looping(Succeed).on_start(RejectUsers(|id| id.0 % 2 == 0));
    let config = paced(4).with_stop_condition(StopCondition::Duration(Duration::from_secs(3)));

    let summary = run_to_end(config, vec![profile]).await;

    assert_eq!(summary.reason, StopReason::TimeLimit);
    assert_eq!(summary.counters.startup_failures, 2);
    assert_eq!(summary.counters.spawned, 4);
    assert_eq!(summary.reports.len(), 2);
    assert!(summary.reports.iter().all(|r| r.id.0 % 2 == 1));
}

// ============================================================================
// Panics
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_panicking_action_is_a_failure() {
    let config = paced(2).with_stop_condition(StopCondition::RequestCount(4));

    let summary = run_to_end(config, vec![looping(Panic)]).await;

    assert_eq!(summary.reason, StopReason::RequestLimit);
    assert_eq!(summary.counters.failures, summary.counters.actions);
    assert_eq!(summary.counters.active, 0);
    assert_eq!(summary.reports.len(), 2);
    assert!(summary.reports.iter().all(|r| r.stats.errors >= 1));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_stop_hook_releases_active_user() {
    let profile = looping(Succeed).on_stop(Panic);
    let (scheduler, events_rx) = SchedulerBuilder::new()
        .config(paced(3))
        .profile(profile)
        .build()
        .unwrap();
    let _collector = spawn_collector(events_rx, false);
    let (handle, run) = scheduler.start();

    sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.snapshot().counters.active, 3);

    handle.stop(StopMode::Graceful).unwrap();
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.counters.active, 0);
    assert_eq!(summary.counters.finished, 3);
    assert!(summary.reports.is_empty());
}

// ============================================================================
// Handle and builder
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_handle_fails_after_run() {
    let (scheduler, events_rx) = SchedulerBuilder::new()
        .config(paced(1))
        .profile(looping(Succeed))
        .build()
        .unwrap();
    let _collector = spawn_collector(events_rx, false);
    let (handle, run) = scheduler.start();

    handle.stop(StopMode::Graceful).unwrap();
    run.await.unwrap().unwrap();

    assert!(matches!(
        handle.ramp_to(10, Duration::ZERO),
        Err(BenchError::SchedulerGone)
    ));
    assert!(matches!(
        handle.stop(StopMode::Immediate),
        Err(BenchError::SchedulerGone)
    ));
}

#[test]
fn test_builder_requires_profile() {
    let err = SchedulerBuilder::<()>::new().build().unwrap_err();
    assert!(matches!(err, BenchError::Config(ConfigError::NoProfiles)));
}

#[test]
fn test_builder_validates_config() {
    let err = SchedulerBuilder::new()
        .config(RunConfig::new(1).with_max_burst(0))
        .profile(looping(Succeed))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        BenchError::Config(ConfigError::InvalidPopulation(_))
    ));
}

#[test]
fn test_builder_rejects_zero_events_buffer() {
    let err = SchedulerBuilder::new()
        .config(paced(1))
        .profile(looping(Succeed))
        .channel_config(ChannelConfig { events_buffer: 0 })
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        BenchError::Config(ConfigError::InvalidChannel(_))
    ));
}

#[test]
fn test_builder_rejects_nan_rate_limit() {
    let err = SchedulerBuilder::new()
        .config(RunConfig::new(1).with_rate_limit(f64::NAN))
        .profile(looping(Succeed))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        BenchError::Config(ConfigError::InvalidRateLimit(_))
    ));
}

#[test]
fn test_builder_validates_profiles() {
    let err = SchedulerBuilder::new()
        .profile(looping(Succeed).weight(0))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        BenchError::Config(ConfigError::InvalidWeight { .. })
    ));
}

#[test]
fn test_builder_tag_filter_without_match() {
    let err = SchedulerBuilder::new()
        .config(RunConfig::new(1).with_tags(TagFilter::any_of(["missing"])))
        .profile(profile_of("p", TaskSetMode::Weighted, &["auth"], Succeed))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        BenchError::Config(ConfigError::NoMatchingActions(_))
    ));
}

#[test]
fn test_builder_tag_filter_drops_profiles() {
    let (scheduler, _rx) = SchedulerBuilder::new()
        .config(RunConfig::new(1).with_tags(TagFilter::any_of(["auth"])))
        .profile(profile_of("authed", TaskSetMode::Weighted, &["auth"], Succeed))
        .profile(profile_of("public", TaskSetMode::Weighted, &["general"], Succeed))
        .build()
        .unwrap();

    let names: Vec<&str> = scheduler.profiles().iter().map(|p| p.name()).collect();
    assert_eq!(names, vec!["authed"]);
}

// ============================================================================
// Aggregation
// ============================================================================

fn report(id: u64, profile: &str, completed: usize, errors: usize, exit: UserExit) -> UserReport {
    let mut stats = UserStats::new();
    stats.completed = completed;
    stats.errors = errors;
    UserReport {
        id: UserId(id),
        profile: profile.to_string(),
        stats,
        exit,
    }
}

#[test]
fn test_aggregate_empty() {
    let aggregated = aggregate_user_reports(&[]);
    assert_eq!(aggregated.total_users, 0);
    assert_eq!(aggregated.total_actions(), 0);
    assert_eq!(aggregated.success_rate(), 0.0);
    assert_eq!(aggregated.error_rate(), 0.0);
}

#[test]
fn test_aggregate_reports() {
    let aggregated = aggregate_user_reports(&[
        report(0, "a", 8, 2, UserExit::Stopped),
        report(1, "a", 5, 0, UserExit::Stopped),
        report(2, "b", 2, 3, UserExit::FailureThreshold),
    ]);

    assert_eq!(aggregated.total_users, 3);
    assert_eq!(aggregated.total_completed, 15);
    assert_eq!(aggregated.total_errors, 5);
    assert!((aggregated.error_rate() - 0.25).abs() < 0.001);
    assert_eq!(aggregated.exited(UserExit::Stopped), 2);
    assert_eq!(aggregated.exited(UserExit::FailureThreshold), 1);
    assert_eq!(aggregated.exited(UserExit::Cancelled), 0);
    assert_eq!(aggregated.profiles.get("a"), Some(&2));
}
