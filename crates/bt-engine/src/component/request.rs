//! Execution requests: where the next search starts and what it may touch.

use bt_core::{NodeIndex, WorldMut};

use super::{Env, LogicState, TreeComponent};
use crate::behavior::DecoratorContext;
use crate::instance::{ActiveNodeType, NodeRuntime};
use crate::logic;
use crate::node::AbortMode;
use crate::search::ExecutionRequest;
use crate::NodeResult;

impl<W> TreeComponent<W>
where
    W: WorldMut + 'static,
{
    /// Ask for a new search.
    ///
    /// `requested_on` is the composite owning the requester, `child_slot` the
    /// child entry the requester guards (if any). Continuing with `Aborted`
    /// switches to a higher priority branch: the search restarts at the
    /// first index of that child entry and may not go past the next one.
    pub(crate) fn request_execution(
        &mut self,
        requested_on: NodeIndex,
        requested_by: NodeIndex,
        child_slot: Option<usize>,
        result: NodeResult,
        env: &mut Env<'_, W>,
    ) {
        if self.state != LogicState::Running {
            tracing::warn!(node = %requested_by, "execution request on a stopped tree dropped");
            return;
        }
        let instance = requested_on.instance_index as usize;
        let Some(tree) = self.instances.get(instance).map(|i| i.tree.clone()) else {
            tracing::warn!(node = %requested_by, "execution request for unknown instance dropped");
            return;
        };
        if matches!(self.pending, Some(crate::search::PendingExecution::OutOfNodes)) {
            tracing::debug!(node = %requested_by, "tree ran out of nodes, request skipped");
            return;
        }

        let layout = tree.layout();
        let switch_to_higher = result == NodeResult::Aborted;
        let mut execution_index = requested_by;
        let mut search_end = None;

        if let (true, Some(slot)) = (switch_to_higher, child_slot) {
            let first = layout.child_execution_index(requested_on.execution_index, slot);
            let end = slot
                .checked_add(1)
                .and_then(|next| layout.child_execution_index(requested_on.execution_index, next));
            let (Some(first), Some(end)) = (first, end) else {
                tracing::error!(node = %requested_on, slot, "execution index overflow, request dropped");
                return;
            };
            execution_index = NodeIndex::new(requested_on.instance_index, first);
            search_end = Some(NodeIndex::new(requested_on.instance_index, end));
        }

        if self.search.has_pending_remove(requested_by) {
            tracing::debug!(node = %requested_by, "requester is being deactivated, request skipped");
            return;
        }
        if (self.search.filter_deactivated_branch || self.waiting_for_aborts)
            && self.search.is_in_deactivated_branch(requested_by)
        {
            tracing::debug!(node = %requested_by, "requester is in a deactivated branch, request skipped");
            return;
        }

        if let Some(existing) = self.request.as_mut() {
            if existing.search_start.takes_priority_over(execution_index) {
                // Less important than what is already queued; only widen the
                // queued search so it still covers this branch.
                if switch_to_higher {
                    let widen = match (existing.search_end, search_end) {
                        (Some(current), Some(new_end)) => current.takes_priority_over(new_end),
                        (Some(_), None) => true,
                        (None, _) => false,
                    };
                    if widen {
                        existing.search_end = search_end;
                    }
                } else {
                    existing.search_end = None;
                }
                tracing::trace!(node = %requested_by, "request merged into a more important one");
                return;
            }
        }

        if switch_to_higher {
            if let Some(active) = self.active_task() {
                if active.takes_priority_over(execution_index) {
                    tracing::debug!(
                        node = %requested_by,
                        active = %active,
                        "active task outranks requested branch, request skipped"
                    );
                    return;
                }
            }
        }

        let guarded_by_logic = child_slot
            .and_then(|slot| layout.composite(requested_on.execution_index)?.children.get(slot))
            .map(|entry| !entry.decorator_ops.is_empty())
            .unwrap_or(false)
            && layout.decorator(requested_by.execution_index).is_some();

        let execute_node = if switch_to_higher {
            if let Some(slot) = child_slot.filter(|_| guarded_by_logic) {
                if !self.decorators_allow(requested_on, slot, env) {
                    tracing::debug!(node = %requested_by, "decorator logic still blocks branch, request skipped");
                    return;
                }
            }

            let current = match self.request {
                Some(request) => request.execute_node,
                None => self.active_branch_root(),
            };
            if current == requested_on {
                current
            } else {
                let Some(common) = self.find_common_parent(requested_on, current) else {
                    tracing::warn!(node = %requested_by, "no common parent with active branch, request dropped");
                    return;
                };
                // Every branch between the common parent and the requester
                // must allow execution as well.
                let mut it = requested_on;
                while it != common {
                    let Some((parent, slot)) = self.parent_link(it) else {
                        break;
                    };
                    if !self.decorators_allow(parent, slot, env) {
                        tracing::debug!(node = %requested_by, blocked_at = %parent, "request blocked by decorators above");
                        return;
                    }
                    it = parent;
                }
                common
            }
        } else {
            if let Some(slot) = child_slot.filter(|_| guarded_by_logic) {
                if self.decorators_allow(requested_on, slot, env) {
                    tracing::debug!(node = %requested_by, "decorator logic still allows branch, request skipped");
                    return;
                }
            }
            requested_on
        };

        tracing::debug!(
            execute = %execute_node,
            start = %execution_index,
            end = ?search_end,
            result = %result,
            "execution requested"
        );
        let mut request = ExecutionRequest {
            execute_node,
            search_start: execution_index,
            search_end,
            continue_with_result: result,
            try_next_child: !switch_to_higher,
        };
        self.pending_locked = true;

        if self.search.search_in_progress {
            self.search.postpone_search = true;
        }

        let active_is_aborting = self
            .instances
            .last()
            .map(|i| i.active_type == ActiveNodeType::AbortingTask)
            .unwrap_or(false);
        if self.waiting_for_aborts || active_is_aborting {
            // The search that started the abort is replayed from scratch
            // once the abort completes.
            request.search_end = None;
            self.rollback_search_changes();
            self.pending = None;
        }
        self.request = Some(request);

        if !self.waiting_for_aborts {
            self.search_scheduled = true;
        }
    }

    /// Request raised by a decorator whose condition changed.
    pub(crate) fn request_from_decorator(&mut self, decorator: NodeIndex, env: &mut Env<'_, W>) {
        let Some(instance) = self.instances.get(decorator.instance_index as usize) else {
            return;
        };
        let tree = instance.tree.clone();
        let layout = tree.layout();
        let (Some(def), Some(node)) = (
            layout.decorator(decorator.execution_index),
            layout.node(decorator.execution_index),
        ) else {
            return;
        };
        let (Some(parent), Some(slot)) = (node.parent, node.child_slot) else {
            return;
        };
        let parent = NodeIndex::new(decorator.instance_index, parent);

        let mode = match def.abort_mode {
            AbortMode::None => return,
            AbortMode::Both if self.is_executing_branch(decorator, parent, slot) => AbortMode::SelfOnly,
            AbortMode::Both => AbortMode::LowerPriority,
            other => other,
        };
        let result = if mode == AbortMode::SelfOnly {
            NodeResult::Failed
        } else {
            NodeResult::Aborted
        };
        self.request_execution(parent, decorator, Some(slot), result, env);
    }

    /// Re-check a decorator and raise a request when the branch it guards
    /// no longer matches the condition.
    pub(crate) fn evaluate_decorator(&mut self, decorator: NodeIndex, env: &mut Env<'_, W>) {
        let Some(instance) = self.instances.get(decorator.instance_index as usize) else {
            return;
        };
        let tree = instance.tree.clone();
        let layout = tree.layout();
        let Some(node) = layout.node(decorator.execution_index) else {
            return;
        };
        let (Some(parent), Some(slot)) = (node.parent, node.child_slot) else {
            return;
        };
        let parent = NodeIndex::new(decorator.instance_index, parent);

        let executing = self.is_executing_branch(decorator, parent, slot);
        let passes = self.check_decorator(decorator, env).unwrap_or(false);
        tracing::trace!(decorator = %decorator, executing, passes, "decorator re-evaluated");
        if executing != passes {
            self.request_from_decorator(decorator, env);
        }
    }

    /// Condition of one decorator with its `inverse` flag applied.
    pub(crate) fn check_decorator(&self, decorator: NodeIndex, env: &Env<'_, W>) -> Option<bool> {
        let instance = self.instances.get(decorator.instance_index as usize)?;
        let def = instance.tree.layout().decorator(decorator.execution_index)?;
        let NodeRuntime::Decorator(object) = instance.nodes.get(decorator.execution_index as usize)?
        else {
            return None;
        };
        let ctx = DecoratorContext {
            tick: env.tick,
            time_seconds: self.time_seconds,
            agent: self.agent,
            world: &*env.world,
            blackboard: &self.blackboard,
            node: decorator,
        };
        Some(object.check(&ctx) != def.inverse)
    }

    /// Whether the decorators of child entry `slot` let it run.
    pub(crate) fn decorators_allow(&self, composite: NodeIndex, slot: usize, env: &Env<'_, W>) -> bool {
        let Some(instance) = self.instances.get(composite.instance_index as usize) else {
            return false;
        };
        let tree = instance.tree.clone();
        let Some(entry) = tree
            .layout()
            .composite(composite.execution_index)
            .and_then(|c| c.children.get(slot))
        else {
            tracing::warn!(composite = %composite, slot, "decorator check on missing child entry");
            return false;
        };

        logic::evaluate(&entry.decorator_ops, entry.decorators.len(), |i| {
            let decorator = NodeIndex::new(composite.instance_index, *entry.decorators.get(i)?);
            let allowed = self.check_decorator(decorator, env);
            if allowed.is_none() {
                tracing::warn!(decorator = %decorator, "missing decorator treated as failed");
            }
            allowed
        })
    }

    /// The running node of `node`'s instance lies inside the child entry
    /// guarded by `node`.
    pub(crate) fn is_executing_branch(&self, node: NodeIndex, parent: NodeIndex, slot: usize) -> bool {
        let Some(instance) = self.instances.get(node.instance_index as usize) else {
            return false;
        };
        let Some(active) = instance.active_node else {
            return false;
        };
        let layout = instance.tree.layout();
        if node.execution_index == layout.root() || node.execution_index == active {
            return true;
        }
        let Some(next) = slot
            .checked_add(1)
            .and_then(|s| layout.child_execution_index(parent.execution_index, s))
        else {
            return false;
        };
        active >= node.execution_index && active < next
    }

    /// Composite a search would resume from right now.
    pub(crate) fn active_branch_root(&self) -> NodeIndex {
        let top = self.instances.len().saturating_sub(1);
        let Some(instance) = self.instances.get(top) else {
            return NodeIndex::ROOT;
        };
        let layout = instance.tree.layout();
        let node = match (instance.active_node, instance.active_type) {
            (None, _) => layout.root(),
            (Some(active), ActiveNodeType::Composite) => active,
            (Some(active), _) => layout.parent(active).unwrap_or(layout.root()),
        };
        NodeIndex::new(top as u16, node)
    }

    /// Parent composite and child slot of a task or composite, crossing into
    /// the parent instance at a subtree root.
    pub(crate) fn parent_link(&self, node: NodeIndex) -> Option<(NodeIndex, usize)> {
        let instance = self.instances.get(node.instance_index as usize)?;
        let layout = instance.tree.layout();
        if let (Some(parent), Some(slot)) = (
            layout.parent(node.execution_index),
            layout.child_slot(node.execution_index),
        ) {
            return Some((NodeIndex::new(node.instance_index, parent), slot));
        }

        let parent_instance_index = node.instance_index.checked_sub(1)?;
        let parent_instance = self.instances.get(parent_instance_index as usize)?;
        let subtree_task = parent_instance.active_node?;
        let layout = parent_instance.tree.layout();
        let parent = layout.parent(subtree_task)?;
        let slot = layout.child_slot(subtree_task)?;
        Some((NodeIndex::new(parent_instance_index, parent), slot))
    }

    pub(crate) fn find_common_parent(&self, a: NodeIndex, b: NodeIndex) -> Option<NodeIndex> {
        let common_instance = a.instance_index.min(b.instance_index);
        let instance = self.instances.get(common_instance as usize)?;
        let layout = instance.tree.layout();

        let lift = |node: NodeIndex| -> u16 {
            if node.instance_index == common_instance {
                return node.execution_index;
            }
            instance
                .active_node
                .and_then(|active| layout.parent(active))
                .unwrap_or(layout.root())
        };
        let mut node_a = lift(a);
        let mut node_b = lift(b);

        while layout.depth(node_a) > layout.depth(node_b) {
            node_a = layout.parent(node_a)?;
        }
        while layout.depth(node_b) > layout.depth(node_a) {
            node_b = layout.parent(node_b)?;
        }
        while node_a != node_b {
            node_a = layout.parent(node_a)?;
            node_b = layout.parent(node_b)?;
        }
        Some(NodeIndex::new(common_instance, node_a))
    }
}
