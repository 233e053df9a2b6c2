//! swarm-bench-core: Virtual-user scheduling for load generation
//!
//! This crate provides the engine behind swarm-bench, including:
//!
//! - Task trees of weighted and sequential task sets
//! - Pacing policies for think time between actions
//! - Virtual users running their own selection loop
//! - A scheduler that ramps, steers and stops the user population
//! - Event collection and metrics aggregation
//!
//! The engine never issues requests itself; everything a user does goes
//! through [`UserAction`] callbacks supplied by the embedding application.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod pacing;
pub mod scheduler;
pub mod taskset;
pub mod traits;
pub mod user;

pub use channel::ChannelConfig;
pub use config::{ConfigError, ExhaustionPolicy, RunConfig, Stage, StopCondition, StopMode};
pub use context::{UserContext, UserId};
pub use error::*;
pub use metrics::*;
pub use pacing::{PacingConfig, PacingPolicy};
pub use scheduler::{
    RunSnapshot, RunSummary, Scheduler, SchedulerBuilder, SchedulerHandle, StopReason,
};
pub use taskset::{
    ActionCatalog, ActionDef, TagFilter, TaskSetMode, TaskTree, TaskTreeBuilder, TreeSpec,
};
pub use traits::{action_fn, FnAction, UserAction};
pub use user::{UserExit, UserProfile, UserReport, UserSignal, VirtualUser, VirtualUserBuilder};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct Browse;

    #[async_trait]
    impl UserAction<u32> for Browse {
        async fn call(&self, ctx: &mut UserContext<u32>) -> ActionResult {
            ctx.session += 1;
            Ok(())
        }
    }

    struct Checkout;

    #[async_trait]
    impl UserAction<u32> for Checkout {
        async fn call(&self, ctx: &mut UserContext<u32>) -> ActionResult {
            if ctx.session == 0 {
                return Err(ActionError::status(409, "empty cart"));
            }
            Ok(())
        }
    }

    fn shop_profile() -> UserProfile<u32> {
        let mut catalog = ActionCatalog::new();
        catalog.insert("browse", Browse).insert("checkout", Checkout);

        let spec: TreeSpec = serde_json::from_value(serde_json::json!({
            "actions": [
                {"name": "browse", "weight": 4, "tags": ["read"]},
                {"name": "checkout", "tags": ["write"]}
            ],
            "task_sets": [
                {"name": "shop", "children": [{"ref": "browse"}, {"ref": "checkout"}]}
            ]
        }))
        .unwrap();

        let tree = spec.build(&catalog).unwrap();
        let root = tree.find_task_set("shop").unwrap();
        UserProfile::new("shopper", Arc::new(tree), root)
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_run() {
        let config = RunConfig::new(10)
            .with_ramp(Duration::from_secs(1))
            .with_pacing(PacingConfig::Constant {
                delay: Duration::from_millis(100),
            })
            .with_stop_condition(StopCondition::Duration(Duration::from_secs(3)))
            .with_seed(42);

        let (scheduler, events_rx) = SchedulerBuilder::new()
            .config(config)
            .profile(shop_profile())
            .build()
            .unwrap();
        let collector = spawn_collector(events_rx, false);

        let summary = scheduler.run().await.unwrap();
        let metrics = collector.await.unwrap();

        assert_eq!(summary.reason, StopReason::TimeLimit);
        assert_eq!(summary.peak_users, 10);
        assert_eq!(metrics.summary.total_requests, summary.counters.actions);

        let browse = &metrics.actions["browse"];
        let checkout = &metrics.actions["checkout"];
        assert!(browse.requests > checkout.requests);
        assert_eq!(browse.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tag_filter_limits_actions() {
        let config = RunConfig::new(2)
            .with_pacing(PacingConfig::Constant {
                delay: Duration::from_millis(100),
            })
            .with_stop_condition(StopCondition::RequestCount(50))
            .with_tags(TagFilter::any_of(["read"]));

        let (scheduler, events_rx) = SchedulerBuilder::new()
            .config(config)
            .profile(shop_profile())
            .build()
            .unwrap();
        let collector = spawn_collector(events_rx, false);

        scheduler.run().await.unwrap();
        let metrics = collector.await.unwrap();

        assert!(metrics.actions.contains_key("browse"));
        assert!(!metrics.actions.contains_key("checkout"));
    }
}
