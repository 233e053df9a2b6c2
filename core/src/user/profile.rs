//! User profiles: what a class of virtual users does

use crate::config::{ConfigError, ExhaustionPolicy};
use crate::pacing::PacingPolicy;
use crate::taskset::{TagFilter, TaskSetId, TaskTree};
use crate::traits::UserAction;
use std::fmt;
use std::sync::Arc;

type SessionFactory<S> = Arc<dyn Fn() -> S + Send + Sync>;

/// A class of virtual users
///
/// Every user spawned from a profile walks the same shared tree from the
/// same root set, with its own session created by the session factory.
/// Pacing, failure threshold and exhaustion policy fall back to the run
/// configuration when not set here.
pub struct UserProfile<S> {
    name: Arc<str>,
    weight: u32,
    tree: Arc<TaskTree<S>>,
    root: TaskSetId,
    session: SessionFactory<S>,
    pacing: Option<Arc<dyn PacingPolicy>>,
    on_start: Option<Arc<dyn UserAction<S>>>,
    on_stop: Option<Arc<dyn UserAction<S>>>,
    max_consecutive_failures: Option<u32>,
    exhaustion: Option<ExhaustionPolicy>,
}

impl<S: Default + 'static> UserProfile<S> {
    /// Profile whose users start from `S::default()`
    pub fn new(name: impl Into<String>, tree: Arc<TaskTree<S>>, root: TaskSetId) -> Self {
        Self::with_session(name, tree, root, S::default)
    }
}

impl<S> UserProfile<S> {
    /// Profile whose users start from a session built by `factory`
    pub fn with_session<F>(
        name: impl Into<String>,
        tree: Arc<TaskTree<S>>,
        root: TaskSetId,
        factory: F,
    ) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            weight: 1,
            tree,
            root,
            session: Arc::new(factory),
            pacing: None,
            on_start: None,
            on_stop: None,
            max_consecutive_failures: None,
            exhaustion: None,
        }
    }

    /// Relative share of the population
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Think time for users of this profile
    pub fn pacing(mut self, pacing: Arc<dyn PacingPolicy>) -> Self {
        self.pacing = Some(pacing);
        self
    }

    /// Hook run once before the first action
    pub fn on_start<A: UserAction<S> + 'static>(mut self, hook: A) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    /// Hook run once after the last action, unless stopped immediately
    pub fn on_stop<A: UserAction<S> + 'static>(mut self, hook: A) -> Self {
        self.on_stop = Some(Arc::new(hook));
        self
    }

    /// Consecutive failures after which a user of this profile stops
    pub fn max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = Some(n);
        self
    }

    /// Exhaustion policy for users of this profile
    pub fn exhaustion(mut self, policy: ExhaustionPolicy) -> Self {
        self.exhaustion = Some(policy);
        self
    }

    /// Profile name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Relative share of the population
    pub fn population_weight(&self) -> u32 {
        self.weight
    }

    /// Shared task tree
    pub fn tree(&self) -> &Arc<TaskTree<S>> {
        &self.tree
    }

    /// Root task set
    pub fn root(&self) -> TaskSetId {
        self.root
    }

    /// Profile-level pacing, if any
    pub fn pacing_policy(&self) -> Option<&Arc<dyn PacingPolicy>> {
        self.pacing.as_ref()
    }

    /// Start hook, if any
    pub fn start_hook(&self) -> Option<&Arc<dyn UserAction<S>>> {
        self.on_start.as_ref()
    }

    /// Stop hook, if any
    pub fn stop_hook(&self) -> Option<&Arc<dyn UserAction<S>>> {
        self.on_stop.as_ref()
    }

    /// Profile-level failure threshold, if any
    pub fn failure_threshold(&self) -> Option<u32> {
        self.max_consecutive_failures
    }

    /// Profile-level exhaustion policy, if any
    pub fn exhaustion_policy(&self) -> Option<ExhaustionPolicy> {
        self.exhaustion
    }

    /// Fresh session for a new user
    pub fn new_session(&self) -> S {
        (self.session)()
    }

    /// Check the profile against its tree
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.weight == 0 {
            return Err(ConfigError::InvalidWeight {
                name: self.name.to_string(),
                weight: 0,
            });
        }
        if self.tree.task_sets().all(|(id, _)| id != self.root) {
            return Err(ConfigError::UnknownNode(format!(
                "root of profile '{}'",
                self.name
            )));
        }
        if self.max_consecutive_failures == Some(0) {
            return Err(ConfigError::InvalidThreshold(format!(
                "profile '{}': consecutive failure threshold must be at least 1",
                self.name
            )));
        }
        Ok(())
    }

    /// Same profile over a tree pruned to `filter`
    ///
    /// `None` when nothing under the root matches.
    pub fn restricted(&self, filter: &TagFilter) -> Option<Self> {
        if filter.is_unrestricted() {
            return Some(self.clone());
        }
        let restriction = self.tree.restrict(filter);
        let root = restriction.task_set(self.root)?;
        Some(Self {
            tree: Arc::new(restriction.tree),
            root,
            ..self.clone()
        })
    }
}

impl<S> Clone for UserProfile<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            weight: self.weight,
            tree: Arc::clone(&self.tree),
            root: self.root,
            session: Arc::clone(&self.session),
            pacing: self.pacing.clone(),
            on_start: self.on_start.clone(),
            on_stop: self.on_stop.clone(),
            max_consecutive_failures: self.max_consecutive_failures,
            exhaustion: self.exhaustion,
        }
    }
}

impl<S> fmt::Debug for UserProfile<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserProfile")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("root", &self.root)
            .field("pacing", &self.pacing)
            .field("on_start", &self.on_start.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}
