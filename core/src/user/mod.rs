//! Virtual users
//!
//! A [`VirtualUser`] is one simulated client, run as its own tokio task:
//!
//! 1. Runs the profile's start hook (failure discards the user)
//! 2. Waits on the run-wide throttle, if any
//! 3. Resolves the next action from its profile's task tree
//! 4. Executes it and emits an [`ActionEvent`](crate::metrics::ActionEvent)
//! 5. Sleeps for the pacing delay
//! 6. Repeats until stopped, exhausted or over its failure threshold,
//!    then runs the stop hook
//!
//! # Example
//!
//! ```ignore
//! use swarm_bench_core::user::{UserSignal, VirtualUserBuilder};
//!
//! let user = VirtualUserBuilder::new(UserId(0))
//!     .profile(profile)
//!     .events_tx(tx)
//!     .pacing(pacing)
//!     .build()?;
//!
//! let (control_tx, control_rx) = watch::channel(UserSignal::Run);
//! let report = user.run(control_rx).await?;
//! println!("Completed: {}", report.stats.completed);
//! ```

mod builder;
mod executor;
mod profile;
mod stats;
mod throttle;

pub use builder::VirtualUserBuilder;
pub use executor::{UserSignal, UserStage, VirtualUser};
pub use profile::UserProfile;
pub use stats::{UserExit, UserReport, UserStats};
pub use throttle::ActionThrottle;

#[cfg(test)]
mod tests;
