//! Scheduler execution logic

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{RunConfig, Stage, StopCondition, StopMode};
use crate::context::UserId;
use crate::error::{BenchError, BenchResult};
use crate::metrics::{ActionEvent, CounterSnapshot, RunCounters};
use crate::pacing::PacingPolicy;
use crate::user::{
    ActionThrottle, UserProfile, UserReport, UserSignal, UserStage, VirtualUser,
    VirtualUserBuilder,
};

use super::aggregator::{aggregate_user_reports, AggregatedStats};
use super::handle::{Command, PopulationSnapshot, SchedulerHandle};
use super::mix::ProfileMix;
use super::ramp::RampPlan;

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The configured run time elapsed
    TimeLimit,
    /// The configured action count was reached
    RequestLimit,
    /// A stop was requested through a handle or a signal
    External,
    /// The last ramp stage finished
    StagesComplete,
    /// Every user left on its own
    AllUsersFinished,
}

/// Outcome of a whole run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Why the run ended
    pub reason: StopReason,
    /// How users were stopped
    pub stop_mode: StopMode,
    /// Wall time from start to the last user leaving
    pub duration: Duration,
    /// Largest number of live users at any time
    pub peak_users: usize,
    /// Largest number of users spawned in a single tick
    pub max_spawn_burst: usize,
    /// Run-wide counters at the end of the run
    pub counters: CounterSnapshot,
    /// Totals over every user report
    pub aggregated: AggregatedStats,
    /// Final report of every user that got past its start hook
    pub reports: Vec<UserReport>,
}

type UserOutcome = (UserId, BenchResult<UserReport>);

/// Everything needed to turn a profile into a running user
struct UserFactory<S> {
    profiles: Vec<UserProfile<S>>,
    events_tx: mpsc::Sender<ActionEvent>,
    counters: Arc<RunCounters>,
    pacing: Arc<dyn PacingPolicy>,
    throttle: Arc<ActionThrottle>,
    config: RunConfig,
}

impl<S: Send + 'static> UserFactory<S> {
    fn create(&self, id: UserId, profile: usize) -> BenchResult<VirtualUser<S>> {
        let profile = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| BenchError::fatal("profile index out of range"))?;

        VirtualUserBuilder::new(id)
            .profile(profile)
            .events_tx(self.events_tx.clone())
            .counters(Arc::clone(&self.counters))
            .pacing(Arc::clone(&self.pacing))
            .throttle(Arc::clone(&self.throttle))
            .max_consecutive_failures(self.config.max_consecutive_failures)
            .exhaustion(self.config.exhaustion)
            .seed(self.config.seed)
            .build()
    }
}

struct UserSlot {
    signal: watch::Sender<UserSignal>,
    stage: watch::Receiver<UserStage>,
    stopping: bool,
}

impl UserSlot {
    fn is_running(&self) -> bool {
        !self.stopping && *self.stage.borrow() == UserStage::Running
    }
}

/// Live users and their bookkeeping
struct Population {
    tasks: JoinSet<UserOutcome>,
    slots: BTreeMap<UserId, UserSlot>,
    mix: ProfileMix,
    next_id: u64,
    spawned: usize,
    startup_failures: usize,
    peak: usize,
    max_burst: usize,
    reports: Vec<UserReport>,
}

impl Population {
    fn new(mix: ProfileMix) -> Self {
        Self {
            tasks: JoinSet::new(),
            slots: BTreeMap::new(),
            mix,
            next_id: 0,
            spawned: 0,
            startup_failures: 0,
            peak: 0,
            max_burst: 0,
            reports: Vec::new(),
        }
    }

    /// Users not asked to stop, including those still in their start hook
    fn live(&self) -> usize {
        self.slots.values().filter(|s| !s.stopping).count()
    }

    /// Users not asked to stop that got past their start hook
    fn running(&self) -> usize {
        self.slots.values().filter(|s| s.is_running()).count()
    }

    fn stopping(&self) -> usize {
        self.slots.len() - self.live()
    }

    fn spawn<S: Send + 'static>(
        &mut self,
        factory: &UserFactory<S>,
        count: usize,
    ) -> BenchResult<()> {
        for _ in 0..count {
            let id = UserId(self.next_id);
            self.next_id += 1;

            let user = factory.create(id, self.mix.next())?;
            let stage = user.stage();
            let (signal, control) = watch::channel(UserSignal::Run);
            self.tasks.spawn(async move { (id, user.run(control).await) });
            self.slots.insert(
                id,
                UserSlot {
                    signal,
                    stage,
                    stopping: false,
                },
            );
            self.spawned += 1;
            factory.counters.user_spawned();
        }
        self.max_burst = self.max_burst.max(count);
        self.peak = self.peak.max(self.live());
        Ok(())
    }

    /// Gracefully stop the `count` newest users
    fn despawn(&mut self, count: usize) {
        for (id, slot) in self
            .slots
            .iter_mut()
            .rev()
            .filter(|(_, slot)| !slot.stopping)
            .take(count)
        {
            tracing::debug!(user_id = %id, "Despawning user");
            slot.signal.send_replace(UserSignal::StopGraceful);
            slot.stopping = true;
        }
    }

    fn signal_all(&mut self, signal: UserSignal) {
        for slot in self.slots.values_mut() {
            slot.signal.send_replace(signal);
            slot.stopping = true;
        }
    }

    fn handle_exit(&mut self, joined: Result<UserOutcome, JoinError>, counters: &RunCounters) {
        match joined {
            Ok((id, Ok(report))) => {
                self.slots.remove(&id);
                tracing::debug!(
                    user_id = %id,
                    exit = ?report.exit,
                    completed = report.stats.completed,
                    errors = report.stats.errors,
                    "User left the population"
                );
                self.reports.push(report);
            }
            Ok((id, Err(BenchError::UserStartup { .. }))) => {
                self.slots.remove(&id);
                self.startup_failures += 1;
            }
            Ok((id, Err(e))) => {
                self.slots.remove(&id);
                tracing::error!(user_id = %id, error = %e, "User returned error");
            }
            Err(e) => {
                tracing::error!(error = %e, "User task panicked");
                // A finished task drops its control receiver; only a panicked
                // one does so without reaching Stopped.
                self.slots.retain(|id, slot| {
                    let stage = *slot.stage.borrow();
                    if !slot.signal.is_closed() || stage == UserStage::Stopped {
                        return true;
                    }
                    tracing::debug!(user_id = %id, stage = ?stage, "Dropping panicked user");
                    counters.user_finished(stage != UserStage::Starting);
                    false
                });
            }
        }
    }

    fn all_failed_startup(&self) -> bool {
        self.spawned > 0 && self.startup_failures == self.spawned && self.slots.is_empty()
    }
}

/// Scheduler owns the population of virtual users for one run
///
/// Responsible for ramping users up and down, evaluating the stop
/// condition, stopping users gracefully or immediately, and collecting
/// their final reports.
pub struct Scheduler<S> {
    factory: UserFactory<S>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    population_tx: watch::Sender<PopulationSnapshot>,
}

impl<S: Send + 'static> Scheduler<S> {
    /// Create a new scheduler from validated parts
    ///
    /// Use `SchedulerBuilder` for validation and tag restriction.
    pub(crate) fn new(
        config: RunConfig,
        profiles: Vec<UserProfile<S>>,
        pacing: Arc<dyn PacingPolicy>,
        events_tx: mpsc::Sender<ActionEvent>,
    ) -> Self {
        let throttle = Arc::new(ActionThrottle::new(config.rate_limit));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (population_tx, _) = watch::channel(PopulationSnapshot::default());

        Self {
            factory: UserFactory {
                profiles,
                events_tx,
                counters: Arc::new(RunCounters::new()),
                pacing,
                throttle,
                config,
            },
            commands_tx,
            commands_rx,
            population_tx,
        }
    }

    /// Get the run configuration
    pub fn config(&self) -> &RunConfig {
        &self.factory.config
    }

    /// Profiles users are drawn from
    pub fn profiles(&self) -> &[UserProfile<S>] {
        &self.factory.profiles
    }

    /// Shared run counters
    pub fn counters(&self) -> Arc<RunCounters> {
        Arc::clone(&self.factory.counters)
    }

    /// Get a control handle
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            commands: self.commands_tx.clone(),
            population: self.population_tx.subscribe(),
            counters: Arc::clone(&self.factory.counters),
        }
    }

    /// Run on a spawned task, returning a handle to steer it
    pub fn start(self) -> (SchedulerHandle, JoinHandle<BenchResult<RunSummary>>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Run until the stop condition, an external stop, or every user leaves
    ///
    /// Fails with [`BenchError::SchedulerFatal`] when every spawned user
    /// failed its start hook.
    pub async fn run(mut self) -> BenchResult<RunSummary> {
        let start = Instant::now();
        let config = self.factory.config.clone();
        let weights = self.factory.profiles.iter().map(|p| p.population_weight());
        let mut population = Population::new(ProfileMix::new(weights));
        let mut plan = RampPlan::new(0, config.users, config.ramp, start);
        let mut stages: VecDeque<Stage> = config.stages.iter().copied().collect();
        let mut stage: Option<usize> = None;

        let mut ticker = tokio::time::interval(config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            users = config.users,
            ramp_secs = config.ramp.as_secs_f64(),
            stages = config.stages.len(),
            stop_condition = ?config.stop_condition,
            profiles = self.factory.profiles.len(),
            "Starting run"
        );

        let (reason, mode) = loop {
            tokio::select! {
                Some(command) = self.commands_rx.recv() => match command {
                    Command::RampTo { users, over } => {
                        tracing::info!(
                            users,
                            over_secs = over.as_secs_f64(),
                            "Ramping population"
                        );
                        stages.clear();
                        stage = None;
                        plan = RampPlan::new(population.live(), users, over, Instant::now());
                    }
                    Command::Stop(mode) => break (StopReason::External, mode),
                },
                Some(joined) = population.tasks.join_next(), if !population.tasks.is_empty() => {
                    population.handle_exit(joined, &self.factory.counters);
                }
                // Republish so the snapshot counts users that just started.
                _ = self.factory.counters.wait_user_started() => {}
                _ = ticker.tick() => {
                    let now = Instant::now();

                    match config.stop_condition {
                        StopCondition::Duration(limit) if now.duration_since(start) >= limit => {
                            break (StopReason::TimeLimit, config.stop_mode);
                        }
                        StopCondition::RequestCount(limit)
                            if self.factory.counters.actions() >= limit =>
                        {
                            break (StopReason::RequestLimit, config.stop_mode);
                        }
                        _ => {}
                    }

                    if plan.is_complete() && now >= plan.ends_at() {
                        if let Some(next) = stages.pop_front() {
                            let index = stage.map_or(0, |i| i + 1);
                            tracing::info!(
                                stage = index,
                                users = next.users,
                                "Entering ramp stage"
                            );
                            stage = Some(index);
                            plan = RampPlan::new(population.live(), next.users, next.duration, now);
                        } else if stage.is_some() {
                            break (StopReason::StagesComplete, config.stop_mode);
                        }
                    }

                    let batch = plan.next_batch(now, config.max_burst);
                    if batch > 0 {
                        if plan.is_up() {
                            population.spawn(&self.factory, batch)?;
                        } else {
                            population.despawn(batch);
                        }
                    }

                    if plan.is_complete() && population.all_failed_startup() {
                        tracing::error!(
                            failures = population.startup_failures,
                            "Every user failed its start hook"
                        );
                        return Err(BenchError::fatal(format!(
                            "all {} users failed to start",
                            population.startup_failures
                        )));
                    }

                    if plan.is_complete()
                        && plan.target() > 0
                        && stages.is_empty()
                        && population.slots.is_empty()
                    {
                        break (StopReason::AllUsersFinished, config.stop_mode);
                    }
                }
            }

            self.publish(&population, &plan, stage);
        };

        tracing::info!(reason = ?reason, mode = ?mode, users = population.live(), "Stopping run");
        self.shutdown(&mut population, mode).await;

        let duration = start.elapsed();
        let aggregated = aggregate_user_reports(&population.reports);
        let counters = self.factory.counters.snapshot();
        tracing::info!(
            elapsed_secs = duration.as_secs_f64(),
            users = aggregated.total_users,
            peak_users = population.peak,
            total_completed = aggregated.total_completed,
            total_errors = aggregated.total_errors,
            aps = aggregated.actions_per_second,
            "Run completed"
        );

        Ok(RunSummary {
            reason,
            stop_mode: mode,
            duration,
            peak_users: population.peak,
            max_spawn_burst: population.max_burst,
            counters,
            aggregated,
            reports: population.reports,
        })
    }

    /// Run with Ctrl+C signal handling
    ///
    /// The first Ctrl+C stops gracefully, a second one immediately.
    pub async fn run_with_signal_handling(self) -> BenchResult<RunSummary> {
        let handle = self.handle();

        let signal_handle = tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            tracing::info!(
                "Received Ctrl+C, stopping gracefully (press again to stop immediately)"
            );
            let _ = handle.stop(StopMode::Graceful);

            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received second Ctrl+C, stopping immediately");
                let _ = handle.stop(StopMode::Immediate);
            }
        });

        let result = self.run().await;
        signal_handle.abort();
        result
    }

    /// Stop every user and wait for all of them to leave
    ///
    /// A graceful stop escalates to an immediate one on a later
    /// `Stop(Immediate)` request or when the stop timeout expires.
    async fn shutdown(&mut self, population: &mut Population, mode: StopMode) {
        let mut escalated = mode == StopMode::Immediate;
        population.signal_all(match mode {
            StopMode::Graceful => UserSignal::StopGraceful,
            StopMode::Immediate => UserSignal::StopImmediate,
        });
        let deadline = match (mode, self.factory.config.stop_timeout) {
            (StopMode::Graceful, Some(timeout)) => Some(Instant::now() + timeout),
            _ => None,
        };
        let stopped = RampPlan::hold(0, Instant::now());
        self.publish(population, &stopped, None);

        while !population.tasks.is_empty() {
            tokio::select! {
                Some(joined) = population.tasks.join_next() => {
                    population.handle_exit(joined, &self.factory.counters);
                }
                Some(command) = self.commands_rx.recv(), if !escalated => {
                    if command == Command::Stop(StopMode::Immediate) {
                        tracing::info!("Escalating to immediate stop");
                        escalated = true;
                        population.signal_all(UserSignal::StopImmediate);
                    }
                }
                _ = sleep_until(deadline), if !escalated => {
                    tracing::warn!(
                        stopping = population.slots.len(),
                        "Graceful stop timed out, stopping immediately"
                    );
                    escalated = true;
                    population.signal_all(UserSignal::StopImmediate);
                }
            }
            self.publish(population, &stopped, None);
        }
    }

    fn publish(&self, population: &Population, plan: &RampPlan, stage: Option<usize>) {
        self.population_tx.send_replace(PopulationSnapshot {
            users: population.running(),
            stopping: population.stopping(),
            target: plan.target(),
            ramping: !plan.is_complete(),
            stage,
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<S> std::fmt::Debug for Scheduler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.factory.config)
            .field(
                "profiles",
                &self
                    .factory
                    .profiles
                    .iter()
                    .map(|p| p.name())
                    .collect::<Vec<_>>(),
            )
            .field("pacing", &self.factory.pacing.name())
            .finish()
    }
}
