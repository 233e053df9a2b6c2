//! API gateway scenario for swarm-bench
//!
//! This crate provides a ready-made action set against an API gateway:
//!
//! - A shared `reqwest` client with login support
//! - Weighted, tagged endpoint actions (public, private, write, search,
//!   cache, rate limit and error probes)
//! - A sequential stress set flooding random endpoints
//! - Two user profiles: `gateway_user` and `mixed_workload_user`
//!
//! # Example
//!
//! ```ignore
//! let client = Arc::new(GatewayClient::new(GatewayConfig::new("http://localhost:8000"))?);
//! let profiles = swarm_bench_gateway::profiles(client, &default_tree_spec())?;
//!
//! let (scheduler, events_rx) = SchedulerBuilder::new()
//!     .config(RunConfig::new(50).with_ramp(Duration::from_secs(10)))
//!     .profiles(profiles)
//!     .build()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod actions;
pub mod client;
pub mod profiles;

pub use actions::GatewaySession;
pub use client::{GatewayClient, GatewayConfig, GatewayConfigError};
pub use profiles::{
    catalog, default_tree_spec, profiles, GATEWAY_USER, MIXED_WORKLOAD_USER,
};
