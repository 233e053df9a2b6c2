//! Explicit registration of actions and task sets

use super::selector::WeightTable;
use super::tree::{Action, ActionId, Child, NodeRef, TaskSet, TaskSetId, TaskSetMode, TaskTree};
use crate::config::ConfigError;
use crate::traits::UserAction;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Definition of an action before registration
pub struct ActionDef<S> {
    name: String,
    weight: u32,
    tags: BTreeSet<String>,
    callback: Arc<dyn UserAction<S>>,
}

impl<S> ActionDef<S> {
    /// Define an action with weight 1 and no tags
    pub fn new<A>(name: impl Into<String>, callback: A) -> Self
    where
        A: UserAction<S> + 'static,
    {
        Self::from_arc(name, Arc::new(callback))
    }

    /// Define an action around an already shared callback
    pub fn from_arc(name: impl Into<String>, callback: Arc<dyn UserAction<S>>) -> Self {
        Self {
            name: name.into(),
            weight: 1,
            tags: BTreeSet::new(),
            callback,
        }
    }

    /// Set the default weight
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Add a tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Add several tags
    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

struct PendingSet {
    name: Arc<str>,
    mode: TaskSetMode,
    children: Vec<Child>,
}

/// Builder for a [`TaskTree`]
///
/// Actions and task sets share one namespace. Children are attached by
/// handle, so a set may be referenced before its own children are added;
/// structural checks run once in [`build`](Self::build).
///
/// ```
/// use swarm_bench_core::taskset::{ActionDef, TaskSetMode, TaskTreeBuilder};
/// use swarm_bench_core::{action_fn, UserContext};
///
/// let noop = || action_fn(|_ctx: &mut UserContext<()>| Box::pin(async { Ok(()) }));
///
/// let mut builder = TaskTreeBuilder::new();
/// let browse = builder.register(ActionDef::new("browse", noop()).weight(3)).unwrap();
/// let buy = builder.register(ActionDef::new("buy", noop()).tag("write")).unwrap();
/// let root = builder.task_set("shopper", TaskSetMode::Weighted).unwrap();
/// builder.add(root, browse).unwrap();
/// builder.add(root, buy).unwrap();
///
/// let tree = builder.build().unwrap();
/// assert_eq!(tree.task_set(root).total_weight(), 4);
/// ```
pub struct TaskTreeBuilder<S> {
    actions: Vec<Action<S>>,
    sets: Vec<PendingSet>,
    names: HashMap<String, NodeRef>,
}

impl<S> Default for TaskTreeBuilder<S> {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            sets: Vec::new(),
            names: HashMap::new(),
        }
    }
}

impl<S> TaskTreeBuilder<S> {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action and return its handle
    pub fn register(&mut self, def: ActionDef<S>) -> Result<ActionId, ConfigError> {
        if def.weight == 0 {
            return Err(ConfigError::InvalidWeight {
                name: def.name,
                weight: 0,
            });
        }
        if self.names.contains_key(&def.name) {
            return Err(ConfigError::DuplicateName(def.name));
        }

        let id = ActionId(self.actions.len());
        self.names.insert(def.name.clone(), NodeRef::Action(id));
        self.actions.push(Action {
            name: Arc::from(def.name),
            weight: def.weight,
            tags: def.tags,
            callback: def.callback,
        });
        Ok(id)
    }

    /// Declare a task set and return its handle
    pub fn task_set(
        &mut self,
        name: impl Into<String>,
        mode: TaskSetMode,
    ) -> Result<TaskSetId, ConfigError> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(ConfigError::DuplicateName(name));
        }

        let id = TaskSetId(self.sets.len());
        self.names.insert(name.clone(), NodeRef::TaskSet(id));
        self.sets.push(PendingSet {
            name: Arc::from(name),
            mode,
            children: Vec::new(),
        });
        Ok(id)
    }

    /// Append a child with its default weight
    ///
    /// Actions use their registered weight, nested sets weigh 1.
    pub fn add(
        &mut self,
        parent: TaskSetId,
        child: impl Into<NodeRef>,
    ) -> Result<(), ConfigError> {
        let child = child.into();
        let weight = match child {
            NodeRef::Action(id) => self
                .actions
                .get(id.0)
                .map(|a| a.weight)
                .ok_or_else(|| ConfigError::UnknownNode(format!("action #{}", id.0)))?,
            NodeRef::TaskSet(_) => 1,
        };
        self.add_weighted(parent, child, weight)
    }

    /// Append a child with an explicit edge weight
    pub fn add_weighted(
        &mut self,
        parent: TaskSetId,
        child: impl Into<NodeRef>,
        weight: u32,
    ) -> Result<(), ConfigError> {
        let child = child.into();
        let child_name = self.name_of(child)?;
        if weight == 0 {
            return Err(ConfigError::InvalidWeight {
                name: child_name,
                weight,
            });
        }

        let set = self
            .sets
            .get_mut(parent.0)
            .ok_or_else(|| ConfigError::UnknownNode(format!("task set #{}", parent.0)))?;
        set.children.push(Child {
            node: child,
            weight,
        });
        Ok(())
    }

    /// Handle registered under `name`
    pub fn lookup(&self, name: &str) -> Option<NodeRef> {
        self.names.get(name).copied()
    }

    fn name_of(&self, node: NodeRef) -> Result<String, ConfigError> {
        match node {
            NodeRef::Action(id) => self
                .actions
                .get(id.0)
                .map(|a| a.name.to_string())
                .ok_or_else(|| ConfigError::UnknownNode(format!("action #{}", id.0))),
            NodeRef::TaskSet(id) => self
                .sets
                .get(id.0)
                .map(|s| s.name.to_string())
                .ok_or_else(|| ConfigError::UnknownNode(format!("task set #{}", id.0))),
        }
    }

    /// Check the structure and freeze the tree
    pub fn build(self) -> Result<TaskTree<S>, ConfigError> {
        if let Some(empty) = self.sets.iter().find(|s| s.children.is_empty()) {
            return Err(ConfigError::EmptyTaskSet(empty.name.to_string()));
        }

        let mut colours = vec![Colour::White; self.sets.len()];
        let mut path = Vec::new();
        for id in 0..self.sets.len() {
            self.visit(id, &mut colours, &mut path)?;
        }

        let sets = self
            .sets
            .into_iter()
            .map(|s| TaskSet {
                table: WeightTable::new(s.children.iter().map(|c| c.weight)),
                name: s.name,
                mode: s.mode,
                children: s.children,
            })
            .collect();

        Ok(TaskTree {
            actions: self.actions,
            sets,
        })
    }

    fn visit(
        &self,
        id: usize,
        colours: &mut [Colour],
        path: &mut Vec<usize>,
    ) -> Result<(), ConfigError> {
        match colours[id] {
            Colour::Black => return Ok(()),
            Colour::Grey => {
                let start = path.iter().position(|&p| p == id).unwrap_or(0);
                let cycle: Vec<&str> = path[start..]
                    .iter()
                    .chain(std::iter::once(&id))
                    .map(|&p| &*self.sets[p].name)
                    .collect();
                return Err(ConfigError::Cycle(cycle.join(" -> ")));
            }
            Colour::White => {}
        }

        colours[id] = Colour::Grey;
        path.push(id);
        for child in &self.sets[id].children {
            if let NodeRef::TaskSet(next) = child.node {
                self.visit(next.0, colours, path)?;
            }
        }
        path.pop();
        colours[id] = Colour::Black;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}
