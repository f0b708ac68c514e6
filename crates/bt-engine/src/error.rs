use bt_core::NodeIndex;
use thiserror::Error;

/// Problems found while flattening a tree description into its node arena.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("composite '{0}' has no children")]
    EmptyComposite(String),

    #[error("tree '{tree}' needs more than {max} execution indices")]
    IndexOverflow { tree: String, max: usize },

    #[error("decorator logic under '{node}' tests slot {slot}, only {count} decorators attached")]
    InvalidDecoratorSlot {
        node: String,
        slot: usize,
        count: usize,
    },

    #[error("decorator logic under '{node}' is malformed: {reason}")]
    MalformedLogic { node: String, reason: &'static str },

    #[error("service '{name}' has invalid interval {interval}s (deviation {deviation}s)")]
    InvalidServiceInterval {
        name: String,
        interval: f32,
        deviation: f32,
    },
}

/// Failures returned by the public [`crate::TreeComponent`] API.
///
/// Problems that show up in the middle of a tick are never returned; they
/// are logged and the offending request is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("tree '{tree}' expects blackboard '{expected}', component has '{actual}'")]
    IncompatibleBlackboard {
        tree: String,
        expected: String,
        actual: String,
    },

    #[error("behavior tree is not running")]
    NotRunning,

    #[error("node {0} does not exist in the running instance stack")]
    UnknownNode(NodeIndex),
}
