//! Static node arena of one tree definition.
//!
//! Every node, auxiliary ones included, lives at the position given by its
//! execution index. Parents are plain indices; composites own the list of
//! their child entries.

use bt_core::KeyId;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::logic::LogicOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum CompositePolicy {
    /// Runs children in order until one fails.
    Sequence,
    /// Runs children in order until one succeeds.
    Selector,
}

/// Which branches a decorator may interrupt when its condition flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum AbortMode {
    #[default]
    None,
    /// Aborts lower priority branches once the condition starts to pass.
    LowerPriority,
    /// Aborts its own branch once the condition stops passing.
    SelfOnly,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildNode {
    Task(u16),
    Composite(u16),
}

impl ChildNode {
    pub fn execution_index(self) -> u16 {
        match self {
            ChildNode::Task(index) | ChildNode::Composite(index) => index,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildEntry {
    pub node: ChildNode,
    pub decorators: Vec<u16>,
    pub decorator_ops: Vec<LogicOp>,
    /// Services of a task child. Composite children carry their own.
    pub services: Vec<u16>,
    /// Lowest execution index inside this entry (first decorator, first
    /// service or the node itself).
    pub first_index: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeDef {
    pub policy: CompositePolicy,
    pub children: Vec<ChildEntry>,
    pub services: Vec<u16>,
    /// Rightmost execution index inside this subtree.
    pub last_execution_index: u16,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskDef {
    /// A search landing on this task while it runs leaves it alone.
    pub ignore_restart_self: bool,
    pub runs_subtree: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecoratorDef {
    pub inverse: bool,
    pub abort_mode: AbortMode,
    pub observed_keys: Vec<KeyId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDef {
    pub interval: f32,
    pub random_deviation: f32,
    pub call_tick_on_search_start: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Composite(CompositeDef),
    Task(TaskDef),
    Decorator(DecoratorDef),
    Service(ServiceDef),
}

impl NodeKind {
    pub fn is_aux(&self) -> bool {
        matches!(self, NodeKind::Decorator(_) | NodeKind::Service(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDef {
    pub execution_index: u16,
    pub name: String,
    /// Composite owning this node. `None` only for the root.
    ///
    /// For services of a composite this is the composite itself.
    pub parent: Option<u16>,
    /// Child entry of `parent` this node belongs to; `None` for the root and
    /// for composite services.
    pub child_slot: Option<usize>,
    /// Number of composites above this node.
    pub depth: u16,
    pub kind: NodeKind,
}

/// Flattened, immutable node arena indexed by execution index.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeLayout {
    nodes: Vec<NodeDef>,
}

impl TreeLayout {
    pub(crate) fn new(nodes: Vec<NodeDef>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[NodeDef] {
        &self.nodes
    }

    pub fn node(&self, index: u16) -> Option<&NodeDef> {
        self.nodes.get(index as usize)
    }

    pub fn root(&self) -> u16 {
        0
    }

    pub fn composite(&self, index: u16) -> Option<&CompositeDef> {
        match &self.node(index)?.kind {
            NodeKind::Composite(composite) => Some(composite),
            _ => None,
        }
    }

    pub fn decorator(&self, index: u16) -> Option<&DecoratorDef> {
        match &self.node(index)?.kind {
            NodeKind::Decorator(decorator) => Some(decorator),
            _ => None,
        }
    }

    pub fn service(&self, index: u16) -> Option<&ServiceDef> {
        match &self.node(index)?.kind {
            NodeKind::Service(service) => Some(service),
            _ => None,
        }
    }

    pub fn task(&self, index: u16) -> Option<&TaskDef> {
        match &self.node(index)?.kind {
            NodeKind::Task(task) => Some(task),
            _ => None,
        }
    }

    pub fn parent(&self, index: u16) -> Option<u16> {
        self.node(index)?.parent
    }

    pub fn depth(&self, index: u16) -> u16 {
        self.node(index).map(|n| n.depth).unwrap_or(0)
    }

    /// Slot of `child` (a task or composite) inside its parent composite.
    pub fn child_slot(&self, child: u16) -> Option<usize> {
        self.node(child)?.child_slot
    }

    /// First execution index of child entry `slot`. `slot == len` gives one
    /// past the composite's subtree. `None` when the index does not fit.
    pub fn child_execution_index(&self, composite: u16, slot: usize) -> Option<u16> {
        let def = self.composite(composite)?;
        match def.children.get(slot) {
            Some(entry) => Some(entry.first_index),
            None if slot == def.children.len() => def.last_execution_index.checked_add(1),
            None => None,
        }
    }

    /// Child entry of `composite` whose range contains `execution_index`.
    ///
    /// Returns `None` when the index lies before the composite. Indices past
    /// the end map onto the last child.
    pub fn matching_child_slot(&self, composite: u16, execution_index: u16) -> Option<usize> {
        let def = self.composite(composite)?;
        if composite > execution_index {
            return None;
        }
        for (slot, entry) in def.children.iter().enumerate() {
            if entry.first_index > execution_index {
                return Some(slot.saturating_sub(1));
            }
        }
        def.children.len().checked_sub(1)
    }
}
