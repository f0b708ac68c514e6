//! Per-search scratch state.
//!
//! Auxiliary node (decorator and service) activation is never applied while
//! a search walks the tree. It is queued here as [`SearchUpdate`]s and
//! applied once the search concludes, or thrown away if the search is
//! rolled back.

use bt_core::NodeIndex;

use crate::instance::{ActiveNodeType, CompositeMemory};
use crate::NodeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchUpdate {
    pub node: NodeIndex,
    pub mode: UpdateMode,
}

impl SearchUpdate {
    pub fn add(node: NodeIndex) -> Self {
        Self {
            node,
            mode: UpdateMode::Add,
        }
    }

    pub fn remove(node: NodeIndex) -> Self {
        Self {
            node,
            mode: UpdateMode::Remove,
        }
    }
}

/// An instance was left by the search and will be popped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeactivationNotify {
    pub instance: u16,
    pub result: NodeResult,
}

/// Range `[start, end)` of a branch torn down by the current search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchRange {
    pub start: NodeIndex,
    pub end: NodeIndex,
}

impl BranchRange {
    pub fn contains(&self, index: NodeIndex) -> bool {
        !index.takes_priority_over(self.start) && index.takes_priority_over(self.end)
    }

    fn expand(&mut self, other: BranchRange) {
        if other.start.takes_priority_over(self.start) {
            self.start = other.start;
        }
        if self.end.takes_priority_over(other.end) {
            self.end = other.end;
        }
    }
}

/// Snapshot taken before a search touches any cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollback {
    pub active_instance: u16,
    pub cursors: Vec<Vec<CompositeMemory>>,
    /// `(active_node, active_type)` of every instance.
    pub active_nodes: Vec<(Option<u16>, ActiveNodeType)>,
    pub deactivated_branch: Option<BranchRange>,
}

#[derive(Debug, Default)]
pub struct SearchData {
    pub pending_updates: Vec<SearchUpdate>,
    pub pending_notifies: Vec<DeactivationNotify>,
    /// Composites entered without a cursor jump straight to the child
    /// containing this index.
    pub search_start: Option<NodeIndex>,
    /// Tasks at or after this index are outside the search.
    pub search_end: Option<NodeIndex>,
    pub rollback: Option<Rollback>,
    pub deactivated_branch: Option<BranchRange>,
    pub search_in_progress: bool,
    pub postpone_search: bool,
    /// Requests from inside `deactivated_branch` are dropped while set.
    pub filter_deactivated_branch: bool,
    /// Result the root of instance 0 reported when the search left it.
    pub tree_result: Option<NodeResult>,
}

impl SearchData {
    /// Queue an aux node update, keeping at most one entry per node.
    ///
    /// A duplicate of the same mode is dropped. An update of the opposite
    /// mode cancels the queued one and is dropped too. A `Remove` for a node
    /// that is not active is pointless and would block a later `Add` from the
    /// same search, so it is dropped as well.
    ///
    /// Returns whether the update was queued.
    pub fn add_unique_update(&mut self, update: SearchUpdate, currently_active: bool) -> bool {
        if let Some(pos) = self
            .pending_updates
            .iter()
            .position(|queued| queued.node == update.node)
        {
            let queued = self.pending_updates[pos];
            if queued.mode != update.mode {
                self.pending_updates.remove(pos);
            }
            return false;
        }

        if update.mode == UpdateMode::Remove && !currently_active {
            return false;
        }

        self.pending_updates.push(update);
        true
    }

    pub fn has_pending_remove(&self, node: NodeIndex) -> bool {
        self.pending_updates
            .iter()
            .any(|u| u.node == node && u.mode == UpdateMode::Remove)
    }

    pub fn extend_deactivated_branch(&mut self, range: BranchRange) {
        match &mut self.deactivated_branch {
            Some(current) => current.expand(range),
            None => self.deactivated_branch = Some(range),
        }
    }

    pub fn is_in_deactivated_branch(&self, index: NodeIndex) -> bool {
        self.deactivated_branch
            .map(|range| range.contains(index))
            .unwrap_or(false)
    }

    /// Forget everything the current search produced.
    pub fn discard(&mut self) {
        self.pending_updates.clear();
        self.pending_notifies.clear();
        self.tree_result = None;
    }

    pub fn reset(&mut self) {
        *self = SearchData::default();
    }
}

/// Accumulated execution request, processed by the next search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Composite the search starts from.
    pub execute_node: NodeIndex,
    pub search_start: NodeIndex,
    pub search_end: Option<NodeIndex>,
    pub continue_with_result: NodeResult,
    /// `false` when switching to a higher priority branch: the search
    /// re-enters `execute_node` from `search_start` instead of asking its
    /// policy for the child after the current one.
    pub try_next_child: bool,
}

/// Outcome of a finished search waiting to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingExecution {
    Task(NodeIndex),
    OutOfNodes,
}
