//! Scheduler for population lifecycle management
//!
//! The Scheduler coordinates one complete run:
//! - Spawning users with a weighted profile mix, spread over a ramp
//! - Moving the population on request or through ramp stages
//! - Evaluating the stop condition
//! - Stopping users gracefully or immediately and collecting their reports
//!
//! # Example
//!
//! ```ignore
//! use swarm_bench_core::{RunConfig, SchedulerBuilder, StopCondition, StopMode};
//!
//! let (scheduler, events_rx) = SchedulerBuilder::new()
//!     .config(RunConfig::new(100).with_ramp(Duration::from_secs(10)))
//!     .profile(browsing)
//!     .profile(checkout.weight(3))
//!     .build()?;
//!
//! let collector = spawn_collector(events_rx, false);
//! let (handle, run) = scheduler.start();
//! handle.ramp_to(20, Duration::from_secs(5))?;
//! handle.stop(StopMode::Graceful)?;
//! let summary = run.await??;
//! ```

mod aggregator;
mod builder;
mod executor;
mod handle;
mod mix;
mod ramp;

pub use aggregator::{aggregate_user_reports, AggregatedStats};
pub use builder::SchedulerBuilder;
pub use executor::{RunSummary, Scheduler, StopReason};
pub use handle::{PopulationSnapshot, RunSnapshot, SchedulerHandle};
pub use ramp::RampPlan;

#[cfg(test)]
mod tests;
