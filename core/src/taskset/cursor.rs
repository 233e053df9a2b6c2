//! Per-user traversal state and action resolution

use super::selector::pick_filtered;
use super::tree::{ActionId, NodeRef, TaskSetId, TaskSetMode, TaskTree};
use crate::config::ExhaustionPolicy;
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// Traversal state owned by one virtual user
///
/// Holds the cursor of every sequential set the user has entered and the
/// sets it can no longer select from. The shared [`TaskTree`] never changes,
/// so two users walking the same sequence advance independently.
#[derive(Debug, Clone, Default)]
pub struct UserTaskState {
    cursors: HashMap<TaskSetId, usize>,
    exhausted: HashSet<TaskSetId>,
    policy: ExhaustionPolicy,
    halted: bool,
}

impl UserTaskState {
    /// Fresh state with the given exhaustion policy
    pub fn new(policy: ExhaustionPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Position of the next child to run in a sequential set
    pub fn cursor(&self, set: TaskSetId) -> usize {
        self.cursors.get(&set).copied().unwrap_or(0)
    }

    /// Whether the set can no longer produce actions for this user
    pub fn is_exhausted(&self, set: TaskSetId) -> bool {
        self.exhausted.contains(&set)
    }

    /// Whether the exhaustion policy ended the user's run
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    fn node_exhausted(&self, node: NodeRef) -> bool {
        match node {
            NodeRef::Action(_) => false,
            NodeRef::TaskSet(id) => self.exhausted.contains(&id),
        }
    }

    fn mark_exhausted(&mut self, set: TaskSetId, mode: TaskSetMode) {
        self.exhausted.insert(set);
        if mode == TaskSetMode::SequentialOnce && self.policy == ExhaustionPolicy::StopUser {
            self.halted = true;
        }
    }
}

/// Outcome of one invocation of a root task set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run this action
    Action(ActionId),
    /// Nothing selectable is left under the root
    Exhausted,
}

impl<S> TaskTree<S> {
    /// Resolve the next action for one user, descending from `root`
    ///
    /// Weighted sets draw one child; sequential sets take the child at the
    /// user's cursor and advance it. Exhausted single-shot sequences are
    /// skipped, and weights renormalize over the remaining children.
    pub fn next_action<R: Rng + ?Sized>(
        &self,
        root: TaskSetId,
        state: &mut UserTaskState,
        rng: &mut R,
    ) -> Step {
        // Every failed descent exhausts at least one more set, so this ends.
        loop {
            if state.halted || state.is_exhausted(root) {
                return Step::Exhausted;
            }
            let mut set = root;
            while let Some(node) = self.step_into(set, state, rng) {
                match node {
                    NodeRef::Action(id) => return Step::Action(id),
                    NodeRef::TaskSet(child) => set = child,
                }
            }
        }
    }

    fn step_into<R: Rng + ?Sized>(
        &self,
        id: TaskSetId,
        state: &mut UserTaskState,
        rng: &mut R,
    ) -> Option<NodeRef> {
        let set = self.task_set(id);
        let children = set.children();

        if set.mode() == TaskSetMode::Weighted {
            let picked = if state.exhausted.is_empty() {
                set.table.pick(rng)
            } else {
                let weights: Vec<u32> = children.iter().map(|c| c.weight).collect();
                pick_filtered(&weights, |i| !state.node_exhausted(children[i].node), rng)
            };
            return match picked {
                Some(i) => Some(children[i].node),
                None => {
                    state.mark_exhausted(id, set.mode());
                    None
                }
            };
        }

        let once = set.mode() == TaskSetMode::SequentialOnce;
        let len = children.len();
        let mut cursor = state.cursor(id);

        for _ in 0..len {
            if cursor >= len {
                if once {
                    break;
                }
                cursor = 0;
            }
            let node = children[cursor].node;
            cursor += 1;
            if state.node_exhausted(node) {
                continue;
            }
            state.cursors.insert(id, cursor);
            if once && cursor == len {
                state.mark_exhausted(id, set.mode());
            }
            return Some(node);
        }

        state.cursors.insert(id, cursor);
        state.mark_exhausted(id, set.mode());
        None
    }
}
