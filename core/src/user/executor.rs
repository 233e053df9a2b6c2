//! Virtual user execution loop

use crate::config::ExhaustionPolicy;
use crate::context::{UserContext, UserId};
use crate::error::{ActionError, BenchError, BenchResult};
use crate::metrics::{ActionEvent, RunCounters};
use crate::pacing::PacingPolicy;
use crate::taskset::{Step, UserTaskState};

use super::profile::UserProfile;
use super::stats::{UserExit, UserReport, UserStats};
use super::throttle::ActionThrottle;

use chrono::Utc;
use futures::FutureExt;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Control signal sent by the scheduler to one user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSignal {
    /// Keep running
    Run,
    /// Finish the in-flight action, run the stop hook, then stop
    StopGraceful,
    /// Abandon the in-flight action and stop without the stop hook
    StopImmediate,
}

/// Lifecycle stage of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStage {
    /// Running the start hook
    Starting,
    /// Executing actions
    Running,
    /// Running the stop hook
    Stopping,
    /// Done
    Stopped,
}

/// One simulated client: start hook -> select -> execute -> report -> pace -> repeat
///
/// The user owns its session and its traversal state; nothing else can
/// touch them while it runs. Users are spawned as tokio tasks by the
/// scheduler and report through the event channel and shared counters.
pub struct VirtualUser<S> {
    pub(super) id: UserId,
    pub(super) profile: UserProfile<S>,
    pub(super) events_tx: mpsc::Sender<ActionEvent>,
    pub(super) counters: Arc<RunCounters>,
    pub(super) pacing: Arc<dyn PacingPolicy>,
    pub(super) throttle: Arc<ActionThrottle>,
    pub(super) max_consecutive_failures: Option<u32>,
    pub(super) exhaustion: ExhaustionPolicy,
    pub(super) rng: StdRng,
    pub(super) stage_tx: watch::Sender<UserStage>,
}

impl<S: Send + 'static> VirtualUser<S> {
    /// User identifier
    pub fn id(&self) -> UserId {
        self.id
    }

    /// Observe the lifecycle stage
    pub fn stage(&self) -> watch::Receiver<UserStage> {
        self.stage_tx.subscribe()
    }

    /// Run the user until it is stopped, exhausted or over its failure threshold
    ///
    /// Returns [`BenchError::UserStartup`] when the start hook fails; such a
    /// user never counts as active and runs no action.
    pub async fn run(self, mut control: watch::Receiver<UserSignal>) -> BenchResult<UserReport> {
        let VirtualUser {
            id,
            profile,
            events_tx,
            counters,
            pacing,
            throttle,
            max_consecutive_failures,
            exhaustion,
            mut rng,
            stage_tx,
        } = self;

        let profile_name = profile.name_arc();
        let tree = Arc::clone(profile.tree());
        let root = profile.root();
        let mut ctx = UserContext::new(id, profile.name(), profile.new_session());
        let mut tasks = UserTaskState::new(exhaustion);
        let mut stats = UserStats::new();
        stats.start();

        tracing::debug!(user_id = %id, profile = %profile_name, "User starting");

        if let Some(hook) = profile.start_hook() {
            let outcome = tokio::select! {
                biased;
                _ = wait_for_immediate(&mut control) => None,
                result = hook.call(&mut ctx) => Some(result),
            };
            match outcome {
                None => {
                    counters.user_finished(false);
                    stage_tx.send_replace(UserStage::Stopped);
                    stats.stop();
                    tracing::debug!(user_id = %id, "User cancelled during start");
                    return Ok(UserReport {
                        id,
                        profile: profile_name.to_string(),
                        stats,
                        exit: UserExit::Cancelled,
                    });
                }
                Some(Err(source)) => {
                    counters.user_start_failed();
                    stage_tx.send_replace(UserStage::Stopped);
                    tracing::warn!(
                        user_id = %id,
                        profile = %profile_name,
                        error = %source,
                        "Start hook failed, discarding user"
                    );
                    return Err(BenchError::UserStartup {
                        user_id: id,
                        source,
                    });
                }
                Some(Ok(())) => {}
            }
        }

        stage_tx.send_replace(UserStage::Running);
        counters.user_started();
        tracing::debug!(user_id = %id, profile = %profile_name, "User running");

        let exit = loop {
            let signal = *control.borrow();
            match signal {
                UserSignal::Run => {}
                UserSignal::StopGraceful => break UserExit::Stopped,
                UserSignal::StopImmediate => break UserExit::Cancelled,
            }

            tokio::select! {
                biased;
                _ = wait_for_immediate(&mut control) => break UserExit::Cancelled,
                _ = throttle.wait() => {}
            }

            let action = match tree.next_action(root, &mut tasks, &mut rng) {
                Step::Action(action) => tree.action(action),
                Step::Exhausted => {
                    tracing::debug!(user_id = %id, "No selectable task left");
                    break UserExit::Exhausted;
                }
            };

            let started_at = Utc::now();
            let start = Instant::now();
            let call = AssertUnwindSafe(action.callback().call(&mut ctx)).catch_unwind();
            let outcome = tokio::select! {
                biased;
                _ = wait_for_immediate(&mut control) => None,
                result = call => Some(result.unwrap_or_else(|_| {
                    tracing::error!(user_id = %id, action = action.name(), "Action panicked");
                    Err(ActionError::failed("action panicked"))
                })),
            };
            let Some(outcome) = outcome else {
                break UserExit::Cancelled;
            };
            let elapsed = start.elapsed();
            ctx.advance();

            counters.record_action(outcome.is_ok());
            match &outcome {
                Ok(()) => stats.record_success(),
                Err(e) => {
                    stats.record_failure();
                    tracing::debug!(
                        user_id = %id,
                        action = action.name(),
                        error = %e,
                        "Action failed"
                    );
                }
            }

            let event = ActionEvent::new(
                id,
                Arc::clone(&profile_name),
                action.name_arc(),
                started_at,
                elapsed,
                &outcome,
            );
            tokio::select! {
                biased;
                _ = wait_for_immediate(&mut control) => break UserExit::Cancelled,
                sent = events_tx.send(event) => {
                    if sent.is_err() {
                        tracing::trace!(user_id = %id, "Event channel closed");
                    }
                }
            }

            if let Some(max) = max_consecutive_failures {
                if stats.consecutive_failures >= max {
                    tracing::warn!(
                        user_id = %id,
                        profile = %profile_name,
                        consecutive_failures = stats.consecutive_failures,
                        "Failure threshold reached, stopping user"
                    );
                    break UserExit::FailureThreshold;
                }
            }

            let delay = pacing.delay_after(elapsed, &mut rng);
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = wait_for_stop(&mut control) => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        };

        stage_tx.send_replace(UserStage::Stopping);
        if exit != UserExit::Cancelled {
            if let Some(hook) = profile.stop_hook() {
                let outcome = tokio::select! {
                    biased;
                    _ = wait_for_immediate(&mut control) => None,
                    result = hook.call(&mut ctx) => Some(result),
                };
                if let Some(Err(e)) = outcome {
                    tracing::warn!(user_id = %id, error = %e, "Stop hook failed");
                }
            }
        }

        stats.stop();
        counters.user_finished(true);
        stage_tx.send_replace(UserStage::Stopped);
        tracing::debug!(
            user_id = %id,
            exit = ?exit,
            completed = stats.completed,
            errors = stats.errors,
            "User stopped"
        );

        Ok(UserReport {
            id,
            profile: profile_name.to_string(),
            stats,
            exit,
        })
    }
}

/// Resolves once an immediate stop is requested or the scheduler is gone
async fn wait_for_immediate(control: &mut watch::Receiver<UserSignal>) {
    let _ = control
        .wait_for(|signal| *signal == UserSignal::StopImmediate)
        .await;
}

/// Resolves once any stop is requested or the scheduler is gone
async fn wait_for_stop(control: &mut watch::Receiver<UserSignal>) {
    let _ = control.wait_for(|signal| *signal != UserSignal::Run).await;
}

impl<S> std::fmt::Debug for VirtualUser<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualUser")
            .field("id", &self.id)
            .field("profile", &self.profile.name())
            .field("pacing", &self.pacing.name())
            .field("exhaustion", &self.exhaustion)
            .finish()
    }
}
