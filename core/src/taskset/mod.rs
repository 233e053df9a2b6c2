//! Action registry and task selection
//!
//! A [`TaskTree`] is built once through a [`TaskTreeBuilder`] (or from a
//! [`TreeSpec`]) and shared read-only by every virtual user. Each user keeps
//! its own [`UserTaskState`], so sequential cursors never leak between users.

mod builder;
mod cursor;
mod definition;
mod selector;
mod tree;


pub use builder::{ActionDef, TaskTreeBuilder};
pub use cursor::{Step, UserTaskState};
pub use definition::{ActionCatalog, ActionSpec, ChildSpec, TaskSetSpec, TreeSpec};
pub use selector::{pick_filtered, TagFilter, WeightTable};
pub use tree::{
    Action, ActionId, Child, NodeRef, Restriction, TaskLine, TaskSet, TaskSetId, TaskSetMode,
    TaskTree,
};
