//! Serializable task tree definitions
//!
//! Weights, tags and nesting can be declared in JSON while the callbacks
//! stay in code: a [`TreeSpec`] names actions, and an [`ActionCatalog`]
//! supplies the callback behind each name.

use super::builder::{ActionDef, TaskTreeBuilder};
use super::tree::{TaskSetMode, TaskTree};
use crate::config::ConfigError;
use crate::traits::UserAction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

/// Declarative task tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeSpec {
    /// Actions, each backed by a catalog entry of the same name
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    /// Task sets referencing actions and other sets by name
    #[serde(default)]
    pub task_sets: Vec<TaskSetSpec>,
}

/// Declared action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Catalog name
    pub name: String,
    /// Default weight
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Tags
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

/// Declared task set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSetSpec {
    /// Set name
    pub name: String,
    /// Selection mode
    #[serde(default)]
    pub mode: TaskSetMode,
    /// Children in order
    pub children: Vec<ChildSpec>,
}

/// Reference to a child node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSpec {
    /// Name of an action or task set
    #[serde(rename = "ref")]
    pub name: String,
    /// Edge weight; the action weight (or 1 for sets) when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl ChildSpec {
    /// Child with its default weight
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: None,
        }
    }

    /// Child with an explicit weight
    pub fn weighted(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight: Some(weight),
        }
    }
}

fn default_weight() -> u32 {
    1
}

impl TreeSpec {
    /// Load a tree definition from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Override the default weight of an action
    pub fn set_weight(&mut self, action: &str, weight: u32) -> Result<(), ConfigError> {
        let spec = self
            .actions
            .iter_mut()
            .find(|a| a.name == action)
            .ok_or_else(|| ConfigError::UnknownNode(action.to_string()))?;
        spec.weight = weight;
        Ok(())
    }

    /// Resolve names against `catalog` and build the tree
    pub fn build<S>(&self, catalog: &ActionCatalog<S>) -> Result<TaskTree<S>, ConfigError> {
        let mut builder = TaskTreeBuilder::new();

        for action in &self.actions {
            let callback = catalog
                .get(&action.name)
                .ok_or_else(|| ConfigError::UnknownNode(action.name.clone()))?;
            builder.register(
                ActionDef::from_arc(action.name.clone(), callback)
                    .weight(action.weight)
                    .tags(action.tags.iter().cloned()),
            )?;
        }

        let mut ids = Vec::with_capacity(self.task_sets.len());
        for set in &self.task_sets {
            ids.push(builder.task_set(set.name.clone(), set.mode)?);
        }

        for (set, id) in self.task_sets.iter().zip(ids) {
            for child in &set.children {
                let node = builder
                    .lookup(&child.name)
                    .ok_or_else(|| ConfigError::UnknownNode(child.name.clone()))?;
                match child.weight {
                    Some(weight) => builder.add_weighted(id, node, weight)?,
                    None => builder.add(id, node)?,
                }
            }
        }

        builder.build()
    }
}

/// Named callbacks a [`TreeSpec`] can refer to
pub struct ActionCatalog<S> {
    actions: BTreeMap<String, Arc<dyn UserAction<S>>>,
}

impl<S> Default for ActionCatalog<S> {
    fn default() -> Self {
        Self {
            actions: BTreeMap::new(),
        }
    }
}

impl<S> ActionCatalog<S> {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback under `name`, replacing any previous entry
    pub fn insert<A>(&mut self, name: impl Into<String>, action: A) -> &mut Self
    where
        A: UserAction<S> + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    /// Callback registered under `name`
    pub fn get(&self, name: &str) -> Option<Arc<dyn UserAction<S>>> {
        self.actions.get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}
