//! Control handle for a running scheduler

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::config::StopMode;
use crate::error::{BenchError, BenchResult};
use crate::metrics::{CounterSnapshot, RunCounters};

/// Requests accepted by the scheduler loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Command {
    RampTo { users: usize, over: Duration },
    Stop(StopMode),
}

/// Population as last published by the scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PopulationSnapshot {
    /// Users past their start hook that were not asked to stop
    pub users: usize,
    /// Users still finishing after a stop request
    pub stopping: usize,
    /// Population the current ramp is heading for
    pub target: usize,
    /// Whether spawn or despawn events are still pending
    pub ramping: bool,
    /// Index of the current ramp stage, if stages are running
    pub stage: Option<usize>,
}

/// Population plus run-wide counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSnapshot {
    /// Scheduler view of the population
    pub population: PopulationSnapshot,
    /// Run-wide counters
    pub counters: CounterSnapshot,
}

/// Cloneable handle to steer a scheduler from other tasks
///
/// Every request fails with [`BenchError::SchedulerGone`] once the run is over.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    pub(crate) population: watch::Receiver<PopulationSnapshot>,
    pub(crate) counters: Arc<RunCounters>,
}

impl SchedulerHandle {
    /// Move the population to `users`, spreading the change over `over`
    ///
    /// Replaces any ramp or stage sequence in progress.
    pub fn ramp_to(&self, users: usize, over: Duration) -> BenchResult<()> {
        self.send(Command::RampTo { users, over })
    }

    /// End the run
    pub fn stop(&self, mode: StopMode) -> BenchResult<()> {
        self.send(Command::Stop(mode))
    }

    /// Users past their start hook that were not asked to stop
    pub fn population(&self) -> usize {
        self.population.borrow().users
    }

    /// Current population and counters
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            population: *self.population.borrow(),
            counters: self.counters.snapshot(),
        }
    }

    /// Receiver notified whenever the population changes
    pub fn watch(&self) -> watch::Receiver<PopulationSnapshot> {
        self.population.clone()
    }

    fn send(&self, command: Command) -> BenchResult<()> {
        self.commands
            .send(command)
            .map_err(|_| BenchError::SchedulerGone)
    }
}
