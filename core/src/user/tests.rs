//! Integration tests for the user module

use super::*;
use crate::config::ExhaustionPolicy;
use crate::context::{UserContext, UserId};
use crate::error::{ActionError, ActionResult, BenchError};
use crate::metrics::{ActionEvent, RunCounters};
use crate::pacing::{Constant, NoWait, PacingPolicy};
use crate::taskset::{ActionDef, TaskSetId, TaskSetMode, TaskTree, TaskTreeBuilder};
use crate::traits::UserAction;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

// ============================================================================
// Test session and actions
// ============================================================================

#[derive(Debug, Default)]
struct Session {
    token: Option<String>,
}

struct Succeed;

#[async_trait]
impl UserAction<Session> for Succeed {
    async fn call(&self, _ctx: &mut UserContext<Session>) -> ActionResult {
        Ok(())
    }
}

struct Fail;

#[async_trait]
impl UserAction<Session> for Fail {
    async fn call(&self, _ctx: &mut UserContext<Session>) -> ActionResult {
        Err(ActionError::status(500, "boom"))
    }
}

struct Sleep(Duration);

#[async_trait]
impl UserAction<Session> for Sleep {
    async fn call(&self, _ctx: &mut UserContext<Session>) -> ActionResult {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

struct Login;

#[async_trait]
impl UserAction<Session> for Login {
    async fn call(&self, ctx: &mut UserContext<Session>) -> ActionResult {
        ctx.session.token = Some(format!("token-{}", ctx.user_id()));
        Ok(())
    }
}

#[derive(Clone, Default)]
struct CaptureToken {
    seen: Arc<Mutex<Vec<Option<String>>>>,
}

#[async_trait]
impl UserAction<Session> for CaptureToken {
    async fn call(&self, ctx: &mut UserContext<Session>) -> ActionResult {
        self.seen.lock().unwrap().push(ctx.session.token.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct CountCalls {
    calls: Arc<AtomicUsize>,
}

impl CountCalls {
    fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserAction<Session> for CountCalls {
    async fn call(&self, _ctx: &mut UserContext<Session>) -> ActionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

type Step = (&'static str, Arc<dyn UserAction<Session>>);

fn step(name: &'static str, action: impl UserAction<Session> + 'static) -> Step {
    (name, Arc::new(action))
}

fn tree_of(mode: TaskSetMode, steps: Vec<Step>) -> (Arc<TaskTree<Session>>, TaskSetId) {
    let mut builder = TaskTreeBuilder::new();
    let root = builder.task_set("root", mode).unwrap();
    for (i, (name, action)) in steps.into_iter().enumerate() {
        let id = builder
            .register(ActionDef::from_arc(format!("{name}-{i}"), action))
            .unwrap();
        builder.add(root, id).unwrap();
    }
    (Arc::new(builder.build().unwrap()), root)
}

fn profile_of(mode: TaskSetMode, steps: Vec<Step>) -> UserProfile<Session> {
    let (tree, root) = tree_of(mode, steps);
    UserProfile::new("test", tree, root)
}

struct Harness {
    user: VirtualUser<Session>,
    events: mpsc::Receiver<ActionEvent>,
    counters: Arc<RunCounters>,
}

fn harness(profile: UserProfile<Session>, pacing: Arc<dyn PacingPolicy>) -> Harness {
    harness_with(VirtualUserBuilder::new(UserId(1)).profile(profile).pacing(pacing))
}

fn harness_with(builder: VirtualUserBuilder<Session>) -> Harness {
    let (tx, events) = mpsc::channel(1024);
    let counters = Arc::new(RunCounters::new());
    let user = builder
        .events_tx(tx)
        .counters(Arc::clone(&counters))
        .seed(Some(7))
        .build()
        .unwrap();
    Harness {
        user,
        events,
        counters,
    }
}

fn drain(events: &mut mpsc::Receiver<ActionEvent>) -> Vec<ActionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_failures_below_threshold_keep_running() {
    let profile = profile_of(
        TaskSetMode::SequentialOnce,
        vec![
            step("fail", Fail),
            step("fail", Fail),
            step("ok", Succeed),
            step("fail", Fail),
            step("fail", Fail),
            step("ok", Succeed),
        ],
    )
    .max_consecutive_failures(3);
    let mut h = harness(profile, Arc::new(NoWait));
    let (_control, rx) = watch::channel(UserSignal::Run);

    let report = h.user.run(rx).await.unwrap();

    assert_eq!(report.exit, UserExit::Exhausted);
    assert_eq!(report.stats.completed, 2);
    assert_eq!(report.stats.errors, 4);
    assert_eq!(report.stats.max_consecutive_failures, 2);

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 6);
    assert_eq!(events.iter().filter(|e| !e.success).count(), 4);
    assert_eq!(&*events[0].action, "fail-0");
    assert_eq!(&*events[2].action, "ok-2");

    let snapshot = h.counters.snapshot();
    assert_eq!(snapshot.actions, 6);
    assert_eq!(snapshot.failures, 4);
    assert_eq!(snapshot.active, 0);
    assert_eq!(snapshot.finished, 1);
}

#[tokio::test]
async fn test_failure_threshold_stops_user_once() {
    let stop_hook = CountCalls::default();
    let profile = profile_of(TaskSetMode::Sequential, vec![step("fail", Fail)])
        .max_consecutive_failures(3)
        .on_stop(stop_hook.clone());
    let mut h = harness(profile, Arc::new(NoWait));
    let (_control, rx) = watch::channel(UserSignal::Run);

    let report = h.user.run(rx).await.unwrap();

    assert_eq!(report.exit, UserExit::FailureThreshold);
    assert_eq!(report.stats.errors, 3);
    assert_eq!(drain(&mut h.events).len(), 3);
    assert_eq!(stop_hook.count(), 1);
}

#[tokio::test]
async fn test_start_hook_failure_discards_user() {
    let stop_hook = CountCalls::default();
    let profile = profile_of(TaskSetMode::Sequential, vec![step("ok", Succeed)])
        .on_start(Fail)
        .on_stop(stop_hook.clone());
    let mut h = harness(profile, Arc::new(NoWait));
    let stage = h.user.stage();
    let (_control, rx) = watch::channel(UserSignal::Run);

    let err = h.user.run(rx).await.unwrap_err();

    match err {
        BenchError::UserStartup { user_id, source } => {
            assert_eq!(user_id, UserId(1));
            assert_eq!(source, ActionError::status(500, "boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(drain(&mut h.events).is_empty());
    assert_eq!(stop_hook.count(), 0);
    assert_eq!(*stage.borrow(), UserStage::Stopped);

    let snapshot = h.counters.snapshot();
    assert_eq!(snapshot.active, 0);
    assert_eq!(snapshot.startup_failures, 1);
    assert_eq!(snapshot.actions, 0);
}

// ============================================================================
// Session state
// ============================================================================

#[tokio::test]
async fn test_start_hook_state_is_visible_to_actions() {
    let capture = CaptureToken::default();
    let profile = profile_of(
        TaskSetMode::SequentialOnce,
        vec![
            step("capture", capture.clone()),
            step("capture", capture.clone()),
        ],
    )
    .on_start(Login);
    let h = harness_with(
        VirtualUserBuilder::new(UserId(7))
            .profile(profile)
            .pacing(Arc::new(NoWait)),
    );
    let (_control, rx) = watch::channel(UserSignal::Run);

    h.user.run(rx).await.unwrap();

    let seen = capture.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![Some("token-7".to_string()); 2]);
}

#[tokio::test]
async fn test_sessions_are_per_user() {
    let capture = CaptureToken::default();
    let profile = profile_of(
        TaskSetMode::SequentialOnce,
        vec![step("capture", capture.clone())],
    )
    .on_start(Login);

    let mut handles = Vec::new();
    let mut controls = Vec::new();
    for id in 1..=3 {
        let h = harness_with(
            VirtualUserBuilder::new(UserId(id))
                .profile(profile.clone())
                .pacing(Arc::new(NoWait)),
        );
        let (control, rx) = watch::channel(UserSignal::Run);
        controls.push(control);
        handles.push(tokio::spawn(h.user.run(rx)));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut seen: Vec<_> = capture
        .seen
        .lock()
        .unwrap()
        .iter()
        .flatten()
        .cloned()
        .collect();
    seen.sort();
    assert_eq!(seen, ["token-1", "token-2", "token-3"]);
}

// ============================================================================
// Stop semantics
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_finishes_in_flight_action() {
    let stop_hook = CountCalls::default();
    let profile = profile_of(
        TaskSetMode::Sequential,
        vec![step("slow", Sleep(Duration::from_secs(1)))],
    )
    .on_stop(stop_hook.clone());
    let mut h = harness(profile, Arc::new(NoWait));
    let (control, rx) = watch::channel(UserSignal::Run);

    let start = Instant::now();
    let task = tokio::spawn(h.user.run(rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    control.send_replace(UserSignal::StopGraceful);

    let report = task.await.unwrap().unwrap();
    let elapsed = start.elapsed();

    assert_eq!(report.exit, UserExit::Stopped);
    assert_eq!(report.stats.completed, 1);
    assert!(elapsed >= Duration::from_secs(1), "stopped after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1050), "stopped after {elapsed:?}");
    assert_eq!(stop_hook.count(), 1);

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 1);
    assert!(events[0].success);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_stop_abandons_in_flight_action() {
    let stop_hook = CountCalls::default();
    let profile = profile_of(
        TaskSetMode::Sequential,
        vec![step("slow", Sleep(Duration::from_secs(10)))],
    )
    .on_stop(stop_hook.clone());
    let mut h = harness(profile, Arc::new(NoWait));
    let (control, rx) = watch::channel(UserSignal::Run);

    let task = tokio::spawn(h.user.run(rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let signalled = Instant::now();
    control.send_replace(UserSignal::StopImmediate);

    let report = task.await.unwrap().unwrap();

    assert!(signalled.elapsed() < Duration::from_millis(50));
    assert_eq!(report.exit, UserExit::Cancelled);
    assert_eq!(report.stats.total_actions(), 0);
    assert_eq!(stop_hook.count(), 0);
    assert!(drain(&mut h.events).is_empty());
    assert_eq!(h.counters.snapshot().finished, 1);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_stop_during_start_hook() {
    let profile = profile_of(TaskSetMode::Sequential, vec![step("ok", Succeed)])
        .on_start(Sleep(Duration::from_secs(30)));
    let h = harness(profile, Arc::new(NoWait));
    let (control, rx) = watch::channel(UserSignal::Run);

    let task = tokio::spawn(h.user.run(rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    control.send_replace(UserSignal::StopImmediate);

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.exit, UserExit::Cancelled);
    assert_eq!(h.counters.snapshot().active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_interrupts_think_time() {
    let profile = profile_of(TaskSetMode::Sequential, vec![step("ok", Succeed)]);
    let h = harness(profile, Arc::new(Constant::new(Duration::from_secs(60))));
    let (control, rx) = watch::channel(UserSignal::Run);

    let start = Instant::now();
    let task = tokio::spawn(h.user.run(rx));
    tokio::time::sleep(Duration::from_secs(1)).await;
    control.send_replace(UserSignal::StopGraceful);

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.exit, UserExit::Stopped);
    assert_eq!(report.stats.completed, 1);
    assert!(start.elapsed() < Duration::from_secs(2));
}

// ============================================================================
// Lifecycle, pacing and exhaustion
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stage_is_observable() {
    let profile = profile_of(TaskSetMode::Sequential, vec![step("ok", Succeed)])
        .on_start(Sleep(Duration::from_millis(100)));
    let h = harness(profile, Arc::new(Constant::new(Duration::from_secs(1))));
    let stage = h.user.stage();
    let (control, rx) = watch::channel(UserSignal::Run);

    assert_eq!(*stage.borrow(), UserStage::Starting);
    let task = tokio::spawn(h.user.run(rx));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*stage.borrow(), UserStage::Starting);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*stage.borrow(), UserStage::Running);
    assert_eq!(h.counters.active(), 1);

    control.send_replace(UserSignal::StopGraceful);
    task.await.unwrap().unwrap();
    assert_eq!(*stage.borrow(), UserStage::Stopped);
    assert_eq!(h.counters.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pacing_delay_between_actions() {
    let profile = profile_of(
        TaskSetMode::SequentialOnce,
        vec![
            step("a", Succeed),
            step("b", Succeed),
            step("c", Succeed),
        ],
    );
    let mut h = harness(profile, Arc::new(Constant::new(Duration::from_secs(1))));
    let (_control, rx) = watch::channel(UserSignal::Run);

    let start = Instant::now();
    let report = h.user.run(rx).await.unwrap();

    assert_eq!(report.exit, UserExit::Exhausted);
    assert_eq!(report.stats.completed, 3);
    assert!(start.elapsed() >= Duration::from_secs(2));

    let events = drain(&mut h.events);
    let names: Vec<_> = events.iter().map(|e| e.action.to_string()).collect();
    assert_eq!(names, ["a-0", "b-1", "c-2"]);
}

#[tokio::test]
async fn test_stop_user_policy_ends_run_after_sequence() {
    let mut builder = TaskTreeBuilder::new();
    let background = builder
        .register(ActionDef::new("background", Succeed))
        .unwrap();
    let first = builder.register(ActionDef::new("first", Succeed)).unwrap();
    let second = builder.register(ActionDef::new("second", Succeed)).unwrap();
    let once = builder
        .task_set("once", TaskSetMode::SequentialOnce)
        .unwrap();
    builder.add(once, first).unwrap();
    builder.add(once, second).unwrap();
    let root = builder.task_set("root", TaskSetMode::Weighted).unwrap();
    builder.add(root, background).unwrap();
    builder.add(root, once).unwrap();
    let profile = UserProfile::new("mixed", Arc::new(builder.build().unwrap()), root);

    let mut h = harness_with(
        VirtualUserBuilder::new(UserId(1))
            .profile(profile)
            .pacing(Arc::new(NoWait))
            .exhaustion(ExhaustionPolicy::StopUser),
    );
    let (_control, rx) = watch::channel(UserSignal::Run);

    let report = h.user.run(rx).await.unwrap();

    assert_eq!(report.exit, UserExit::Exhausted);
    let events = drain(&mut h.events);
    assert_eq!(&*events.last().unwrap().action, "second");
    assert_eq!(events.iter().filter(|e| &*e.action == "first").count(), 1);
}

#[tokio::test]
async fn test_scheduler_gone_stops_user() {
    let profile = profile_of(
        TaskSetMode::Sequential,
        vec![step("slow", Sleep(Duration::from_secs(3600)))],
    );
    let h = harness(profile, Arc::new(NoWait));
    let (control, rx) = watch::channel(UserSignal::Run);
    drop(control);

    let report = tokio::time::timeout(Duration::from_secs(5), h.user.run(rx))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.exit, UserExit::Cancelled);
}
