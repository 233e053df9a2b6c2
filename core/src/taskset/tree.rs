//! Frozen arena of actions and task sets

use super::selector::{pick_filtered, TagFilter, WeightTable};
use crate::traits::UserAction;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Handle of a registered action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub(crate) usize);

/// Handle of a registered task set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskSetId(pub(crate) usize);

/// A child slot of a task set: either an action or a nested task set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// Leaf action
    Action(ActionId),
    /// Nested task set
    TaskSet(TaskSetId),
}

impl From<ActionId> for NodeRef {
    fn from(id: ActionId) -> Self {
        NodeRef::Action(id)
    }
}

impl From<TaskSetId> for NodeRef {
    fn from(id: TaskSetId) -> Self {
        NodeRef::TaskSet(id)
    }
}

/// How a task set picks its next child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSetMode {
    /// One weighted random pick per invocation
    #[default]
    Weighted,
    /// Children in definition order, restarting after the last one
    Sequential,
    /// Children in definition order once; afterwards the set is exhausted
    SequentialOnce,
}

impl TaskSetMode {
    /// Whether children run in definition order
    pub fn is_sequential(self) -> bool {
        !matches!(self, TaskSetMode::Weighted)
    }
}

impl fmt::Display for TaskSetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskSetMode::Weighted => "weighted",
            TaskSetMode::Sequential => "sequential",
            TaskSetMode::SequentialOnce => "sequential-once",
        })
    }
}

/// A registered action
pub struct Action<S> {
    pub(super) name: Arc<str>,
    pub(super) weight: u32,
    pub(super) tags: BTreeSet<String>,
    pub(super) callback: Arc<dyn UserAction<S>>,
}

impl<S> Action<S> {
    /// Action name, as reported on the event stream
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the name
    pub fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Default weight used when the action is added without an explicit weight
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Tags attached at registration
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// The callback to invoke
    pub fn callback(&self) -> &Arc<dyn UserAction<S>> {
        &self.callback
    }
}

impl<S> Clone for Action<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            weight: self.weight,
            tags: self.tags.clone(),
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<S> fmt::Debug for Action<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("tags", &self.tags)
            .finish()
    }
}

/// A weighted child edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Child {
    /// Target node
    pub node: NodeRef,
    /// Selection weight, at least 1
    pub weight: u32,
}

/// A frozen task set
#[derive(Debug, Clone)]
pub struct TaskSet {
    pub(super) name: Arc<str>,
    pub(super) mode: TaskSetMode,
    pub(super) children: Vec<Child>,
    pub(super) table: WeightTable,
}

impl TaskSet {
    /// Task set name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Selection mode
    pub fn mode(&self) -> TaskSetMode {
        self.mode
    }

    /// Children in definition order
    pub fn children(&self) -> &[Child] {
        &self.children
    }

    /// Sum of the child weights
    pub fn total_weight(&self) -> u64 {
        self.table.total()
    }
}

/// Immutable tree of actions and task sets, shared by every virtual user
///
/// Built by [`TaskTreeBuilder`](super::TaskTreeBuilder); every task set is
/// non-empty and no set reaches itself, so selection never fails at run time.
pub struct TaskTree<S> {
    pub(super) actions: Vec<Action<S>>,
    pub(super) sets: Vec<TaskSet>,
}

impl<S> TaskTree<S> {
    /// Look up an action
    ///
    /// # Panics
    /// Panics if the handle belongs to another tree.
    pub fn action(&self, id: ActionId) -> &Action<S> {
        &self.actions[id.0]
    }

    /// Look up a task set
    ///
    /// # Panics
    /// Panics if the handle belongs to another tree.
    pub fn task_set(&self, id: TaskSetId) -> &TaskSet {
        &self.sets[id.0]
    }

    /// All actions with their handles
    pub fn actions(&self) -> impl Iterator<Item = (ActionId, &Action<S>)> {
        self.actions.iter().enumerate().map(|(i, a)| (ActionId(i), a))
    }

    /// All task sets with their handles
    pub fn task_sets(&self) -> impl Iterator<Item = (TaskSetId, &TaskSet)> {
        self.sets.iter().enumerate().map(|(i, s)| (TaskSetId(i), s))
    }

    /// Find an action by name
    pub fn find_action(&self, name: &str) -> Option<ActionId> {
        self.actions
            .iter()
            .position(|a| &*a.name == name)
            .map(ActionId)
    }

    /// Find a task set by name
    pub fn find_task_set(&self, name: &str) -> Option<TaskSetId> {
        self.sets.iter().position(|s| &*s.name == name).map(TaskSetId)
    }

    /// Name of a node
    pub fn node_name(&self, node: NodeRef) -> &str {
        match node {
            NodeRef::Action(id) => self.action(id).name(),
            NodeRef::TaskSet(id) => self.task_set(id).name(),
        }
    }

    /// Weighted pick among the direct children of `set`, ignoring its mode
    pub fn select<R: Rng + ?Sized>(&self, set: TaskSetId, rng: &mut R) -> NodeRef {
        let set = self.task_set(set);
        // Frozen sets are non-empty with positive weights, so the pick succeeds.
        let idx = set.table.pick(rng).unwrap_or(0);
        set.children[idx].node
    }

    /// Weighted pick among the direct children of `set` that match `filter`
    ///
    /// A nested set matches when any action below it matches. Returns `None`
    /// when no child matches.
    pub fn select_matching<R: Rng + ?Sized>(
        &self,
        set: TaskSetId,
        filter: &TagFilter,
        rng: &mut R,
    ) -> Option<NodeRef> {
        let set = self.task_set(set);
        let weights: Vec<u32> = set.children.iter().map(|c| c.weight).collect();
        pick_filtered(
            &weights,
            |i| self.contains_match(set.children[i].node, filter),
            rng,
        )
        .map(|i| set.children[i].node)
    }

    /// Whether `node` is, or contains, an action matching `filter`
    pub fn contains_match(&self, node: NodeRef, filter: &TagFilter) -> bool {
        match node {
            NodeRef::Action(id) => filter.matches(self.action(id).tags()),
            NodeRef::TaskSet(id) => self
                .task_set(id)
                .children
                .iter()
                .any(|c| self.contains_match(c.node, filter)),
        }
    }

    /// Copy of the tree keeping only actions that match `filter`
    ///
    /// Task sets left without children are dropped, and so are the edges
    /// pointing at them. Remaining weights keep their values, so proportions
    /// among the kept children are unchanged.
    pub fn restrict(&self, filter: &TagFilter) -> Restriction<S> {
        let keep_action: Vec<bool> = self
            .actions
            .iter()
            .map(|a| filter.matches(&a.tags))
            .collect();
        let mut memo = vec![None; self.sets.len()];
        let keep_set: Vec<bool> = (0..self.sets.len())
            .map(|i| self.keeps(TaskSetId(i), &keep_action, &mut memo))
            .collect();

        let action_map = remap(&keep_action);
        let set_map = remap(&keep_set);

        let actions = self
            .actions
            .iter()
            .zip(&keep_action)
            .filter(|(_, keep)| **keep)
            .map(|(a, _)| a.clone())
            .collect();

        let sets = self
            .sets
            .iter()
            .zip(&keep_set)
            .filter(|(_, keep)| **keep)
            .map(|(s, _)| {
                let children: Vec<Child> = s
                    .children
                    .iter()
                    .filter_map(|c| {
                        let node = match c.node {
                            NodeRef::Action(id) => NodeRef::Action(ActionId(action_map[id.0]?)),
                            NodeRef::TaskSet(id) => NodeRef::TaskSet(TaskSetId(set_map[id.0]?)),
                        };
                        Some(Child {
                            node,
                            weight: c.weight,
                        })
                    })
                    .collect();
                TaskSet {
                    name: Arc::clone(&s.name),
                    mode: s.mode,
                    table: WeightTable::new(children.iter().map(|c| c.weight)),
                    children,
                }
            })
            .collect();

        Restriction {
            tree: TaskTree { actions, sets },
            set_map,
        }
    }

    fn keeps(&self, id: TaskSetId, keep_action: &[bool], memo: &mut Vec<Option<bool>>) -> bool {
        if let Some(known) = memo[id.0] {
            return known;
        }
        let keep = self.sets[id.0].children.iter().any(|c| match c.node {
            NodeRef::Action(a) => keep_action[a.0],
            NodeRef::TaskSet(s) => self.keeps(s, keep_action, memo),
        });
        memo[id.0] = Some(keep);
        keep
    }

    /// Flatten the tree below `root` with each node's long-run share of
    /// selections (sequential children share their parent's share evenly)
    pub fn describe(&self, root: TaskSetId) -> Vec<TaskLine> {
        let mut lines = Vec::new();
        self.describe_into(NodeRef::TaskSet(root), 0, 1, 1.0, &mut lines);
        lines
    }

    fn describe_into(
        &self,
        node: NodeRef,
        depth: usize,
        weight: u32,
        share: f64,
        lines: &mut Vec<TaskLine>,
    ) {
        match node {
            NodeRef::Action(id) => {
                let action = self.action(id);
                lines.push(TaskLine {
                    depth,
                    name: action.name().to_string(),
                    mode: None,
                    weight,
                    share,
                    tags: action.tags.iter().cloned().collect(),
                });
            }
            NodeRef::TaskSet(id) => {
                let set = self.task_set(id);
                lines.push(TaskLine {
                    depth,
                    name: set.name().to_string(),
                    mode: Some(set.mode),
                    weight,
                    share,
                    tags: Vec::new(),
                });
                let total = set.total_weight() as f64;
                let len = set.children.len() as f64;
                for child in &set.children {
                    let child_share = if set.mode.is_sequential() {
                        share / len
                    } else {
                        share * f64::from(child.weight) / total
                    };
                    self.describe_into(child.node, depth + 1, child.weight, child_share, lines);
                }
            }
        }
    }
}

impl<S> fmt::Debug for TaskTree<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskTree")
            .field("actions", &self.actions)
            .field("sets", &self.sets)
            .finish()
    }
}

fn remap(keep: &[bool]) -> Vec<Option<usize>> {
    let mut next = 0;
    keep.iter()
        .map(|&k| {
            k.then(|| {
                next += 1;
                next - 1
            })
        })
        .collect()
}

/// Result of [`TaskTree::restrict`]
pub struct Restriction<S> {
    /// The pruned tree
    pub tree: TaskTree<S>,
    set_map: Vec<Option<usize>>,
}

impl<S> Restriction<S> {
    /// Handle of `set` in the pruned tree, if it survived
    pub fn task_set(&self, set: TaskSetId) -> Option<TaskSetId> {
        self.set_map.get(set.0).copied().flatten().map(TaskSetId)
    }
}

/// One row of [`TaskTree::describe`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskLine {
    /// Nesting depth, root is 0
    pub depth: usize,
    /// Node name
    pub name: String,
    /// Mode for task sets, `None` for actions
    pub mode: Option<TaskSetMode>,
    /// Weight of the edge leading here
    pub weight: u32,
    /// Long-run fraction of the root's invocations reaching this node
    pub share: f64,
    /// Action tags
    pub tags: Vec<String>,
}
