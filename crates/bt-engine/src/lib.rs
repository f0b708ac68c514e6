//! Behavior tree runtime.
//!
//! Trees are built once with [`TreeBuilder`] into a flat, index-addressed
//! [`BehaviorTree`]. A [`TreeComponent`] runs one tree for one agent: it keeps
//! the instance stack (root tree plus pushed subtrees), performs priority
//! ordered searches when a task finishes or a decorator's condition flips,
//! and ticks the running task together with the active decorators and
//! services.
//!
//! ```ignore
//! let tree = BehaviorTree::<MyWorld>::builder("guard").build(
//!     CompositeSpec::selector("root")
//!         .child(ChildSpec::task(TaskSpec::new("attack", || Attack)).decorator(
//!             DecoratorSpec::new("has target", move || BlackboardCondition::is_set(target))
//!                 .abort_mode(AbortMode::Both)
//!                 .observes(target),
//!         ))
//!         .task(TaskSpec::new("patrol", || Patrol::default())),
//! )?;
//! let mut component = TreeComponent::new(agent, tree, Blackboard::new(def));
//! component.start_logic()?;
//! component.tick(&ctx, &mut world);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod behavior;
pub mod builder;
pub mod component;
pub mod composite;
pub mod config;
pub mod error;
pub mod instance;
pub mod logic;
pub mod node;
pub mod nodes;
pub mod result;
pub mod search;
pub mod tree;

pub use behavior::{Decorator, DecoratorContext, DecoratorSignal, NodeContext, Service, Task};
pub use builder::{
    ChildSpec, CompositeSpec, DecoratorSpec, ServiceSpec, TaskSpec, TreeBuilder, MAX_TREE_NODES,
};
pub use component::{Diagnostics, RestartMode, TreeComponent};
pub use composite::ChildStep;
pub use config::{RunMode, RuntimeConfig};
pub use error::{BuildError, TreeError};
pub use logic::{LogicDefect, LogicOp};
pub use node::{AbortMode, CompositePolicy, TreeLayout};
pub use result::NodeResult;
pub use tree::BehaviorTree;
