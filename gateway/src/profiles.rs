//! Default task tree and user profiles for the gateway scenario

use std::sync::Arc;
use std::time::Duration;

use swarm_bench_core::config::ConfigError;
use swarm_bench_core::pacing::Between;
use swarm_bench_core::taskset::{ActionSpec, ChildSpec, TaskSetSpec};
use swarm_bench_core::{ActionCatalog, TaskSetMode, TreeSpec, UserProfile};

use crate::actions::{
    CachedContent, ErrorConditions, FloodRequests, GatewaySession, Login, PostData,
    PrivateContent, PublicContent, RateLimitProbe, Search,
};
use crate::client::GatewayClient;

/// Profile cycling through the weighted gateway endpoints
pub const GATEWAY_USER: &str = "gateway_user";

/// Profile mixing the gateway endpoints with the stress sequence
pub const MIXED_WORKLOAD_USER: &str = "mixed_workload_user";

/// Weighted set of gateway endpoints
pub const GATEWAY_SET: &str = "gateway";

/// Sequential stress set
pub const STRESS_SET: &str = "stress";

/// Root of the mixed workload
pub const MIXED_SET: &str = "mixed";

/// Callbacks for every action of [`default_tree_spec`], over one shared client
pub fn catalog(client: Arc<GatewayClient>) -> ActionCatalog<GatewaySession> {
    let mut catalog = ActionCatalog::new();
    catalog
        .insert("public_content", PublicContent::new(Arc::clone(&client)))
        .insert("private_content", PrivateContent::new(Arc::clone(&client)))
        .insert("post_data", PostData::new(Arc::clone(&client)))
        .insert("search", Search::new(Arc::clone(&client)))
        .insert("cached_content", CachedContent::new(Arc::clone(&client)))
        .insert("rate_limit_probe", RateLimitProbe::new(Arc::clone(&client)))
        .insert("error_conditions", ErrorConditions::new(Arc::clone(&client)))
        .insert("flood_requests", FloodRequests::new(client));
    catalog
}

fn action(name: &str, weight: u32, tags: &[&str]) -> ActionSpec {
    ActionSpec {
        name: name.to_string(),
        weight,
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

/// Weights, tags and nesting of the gateway scenario
///
/// Serialize it to JSON to get a template for `--tree` overrides.
pub fn default_tree_spec() -> TreeSpec {
    let actions = vec![
        action("public_content", 5, &["general"]),
        action("private_content", 3, &["auth"]),
        action("post_data", 2, &["auth", "write"]),
        action("search", 1, &["search"]),
        action("cached_content", 4, &["cache"]),
        action("rate_limit_probe", 1, &["ratelimit"]),
        action("error_conditions", 1, &["error"]),
        action("flood_requests", 1, &["stress"]),
    ];

    let gateway_children = actions
        .iter()
        .filter(|a| a.name != "flood_requests")
        .map(|a| ChildSpec::new(a.name.clone()))
        .collect();

    TreeSpec {
        actions,
        task_sets: vec![
            TaskSetSpec {
                name: GATEWAY_SET.to_string(),
                mode: TaskSetMode::Weighted,
                children: gateway_children,
            },
            TaskSetSpec {
                name: STRESS_SET.to_string(),
                mode: TaskSetMode::Sequential,
                children: vec![ChildSpec::new("flood_requests")],
            },
            TaskSetSpec {
                name: MIXED_SET.to_string(),
                mode: TaskSetMode::Weighted,
                children: vec![ChildSpec::new(GATEWAY_SET), ChildSpec::new(STRESS_SET)],
            },
        ],
    }
}

/// Build both gateway profiles from `spec`
///
/// Every profile logs in on start. `gateway_user` waits 1-5 s between
/// actions, `mixed_workload_user` 0.1-0.5 s.
pub fn profiles(
    client: Arc<GatewayClient>,
    spec: &TreeSpec,
) -> Result<Vec<UserProfile<GatewaySession>>, ConfigError> {
    let tree = Arc::new(spec.build(&catalog(Arc::clone(&client)))?);

    let root_of = |name: &str| {
        tree.find_task_set(name)
            .ok_or_else(|| ConfigError::UnknownNode(name.to_string()))
    };

    let gateway = UserProfile::new(GATEWAY_USER, Arc::clone(&tree), root_of(GATEWAY_SET)?)
        .pacing(Arc::new(Between::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
        )?))
        .on_start(Login::new(Arc::clone(&client)));

    let mixed = UserProfile::new(MIXED_WORKLOAD_USER, Arc::clone(&tree), root_of(MIXED_SET)?)
        .pacing(Arc::new(Between::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
        )?))
        .on_start(Login::new(client));

    Ok(vec![gateway, mixed])
}
