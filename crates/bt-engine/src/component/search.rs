//! The search walk.
//!
//! A search first deactivates everything between the running node and the
//! composite named by the request, then descends again, asking each
//! composite for its next child until a task is found or the root of the
//! root tree is left. Aux node changes are only queued here.

use std::rc::Rc;

use bt_core::{DeterministicRng, NodeIndex, WorldMut};

use super::{Env, TreeComponent};
use crate::composite::ChildStep;
use crate::instance::{ActiveNodeType, NodeRuntime};
use crate::node::{AbortMode, ChildNode, ServiceDef};
use crate::search::{
    BranchRange, DeactivationNotify, PendingExecution, Rollback, SearchUpdate, UpdateMode,
};
use crate::{BehaviorTree, NodeResult};

impl<W> TreeComponent<W>
where
    W: WorldMut + 'static,
{
    pub(crate) fn process_execution_request(&mut self, env: &mut Env<'_, W>) {
        self.search_scheduled = false;
        if self.waiting_for_aborts {
            return;
        }
        if self.pending.is_some() {
            self.process_pending_execution(env);
            return;
        }
        let Some(request) = self.request else {
            return;
        };
        if self.instances.get(self.active_instance as usize).is_none() {
            tracing::warn!("search requested without an active instance");
            self.request = None;
            self.pending_locked = false;
            return;
        }

        self.search.rollback = Some(self.snapshot());
        self.trace_node("bt.search.start", request.search_start);
        tracing::debug!(
            execute = %request.execute_node,
            start = %request.search_start,
            end = ?request.search_end,
            "search started"
        );

        let mut result = request.continue_with_result;
        let execute_node = request.execute_node;
        if self.active_node_index() != Some(execute_node) {
            match self.deactivate_up_to(execute_node, &mut result, env) {
                Err(()) => {
                    tracing::error!(
                        execute = %execute_node,
                        "execution path does not contain the requested composite, restarting tree"
                    );
                    self.rollback_search_changes();
                    self.request = None;
                    self.pending_locked = false;
                    self.request_execution(
                        NodeIndex::ROOT,
                        NodeIndex::ROOT,
                        None,
                        NodeResult::Aborted,
                        env,
                    );
                    return;
                }
                Ok(Some(slot)) => self.mark_deactivated_branch(execute_node, slot),
                Ok(None) => {}
            }
        }

        self.search.postpone_search = false;
        self.search.search_in_progress = true;

        let active = self.active_instance;
        let needs_root = self
            .instances
            .get(active as usize)
            .map(|i| i.active_node.is_none())
            .unwrap_or(false);
        if needs_root {
            if let Some(instance) = self.instances.get_mut(active as usize) {
                instance.active_node = Some(instance.tree.layout().root());
                instance.active_type = ActiveNodeType::Composite;
            }
            self.on_node_activation(NodeIndex::new(active, 0), env);
        }

        if !request.try_next_child {
            let floor = request
                .search_start
                .previous()
                .unwrap_or(request.search_start);
            self.unregister_aux_nodes_up_to(floor);
            if let Some(cursor) = self
                .instances
                .get_mut(execute_node.instance_index as usize)
                .and_then(|i| i.cursor_mut(execute_node.execution_index))
            {
                cursor.current_child = None;
            }
            self.search.search_start = Some(request.search_start);
            self.search.search_end = request.search_end;
        } else {
            // Aux nodes of the requester stay, it outranks what follows.
            if request.continue_with_result == NodeResult::Failed {
                self.unregister_aux_nodes_up_to(request.search_start);
            }
            self.search.search_start = None;
            self.search.search_end = None;
        }

        let mut next_task = None;
        let mut test_node = Some(execute_node);
        while let Some(composite) = test_node {
            let step = self.find_child_to_execute(composite, &mut result, env);
            self.process_blackboard_changes(env);
            if self.search.postpone_search {
                break;
            }
            test_node = match step {
                ChildStep::ReturnToParent => self.return_to_parent(composite, &mut result, env),
                ChildStep::Child(slot) => {
                    let child = self.tree_at(composite.instance_index).and_then(|tree| {
                        let entry = tree
                            .layout()
                            .composite(composite.execution_index)?
                            .children
                            .get(slot)?;
                        Some(entry.node)
                    });
                    match child {
                        Some(ChildNode::Task(index)) => {
                            next_task = Some(NodeIndex::new(composite.instance_index, index));
                            None
                        }
                        Some(ChildNode::Composite(index)) => {
                            Some(NodeIndex::new(composite.instance_index, index))
                        }
                        None => None,
                    }
                }
            };
        }

        let postponed = self.search.postpone_search;
        let valid = match next_task {
            Some(task) => self.is_valid_search_result(task, request.search_end),
            None => true,
        };
        if !valid || postponed {
            self.rollback_search_changes();
            self.trace_node("bt.search.rollback", request.search_start);
            tracing::debug!(valid, postponed, "search rolled back");
        }
        self.search.search_in_progress = false;

        if postponed {
            self.trace_node("bt.search.postponed", request.search_start);
            self.search_scheduled = true;
            return;
        }

        self.request = None;
        self.pending_locked = false;
        if valid {
            let top_is_active = self
                .instances
                .last()
                .map(|i| i.active_type == ActiveNodeType::ActiveTask)
                .unwrap_or(false);
            if top_is_active {
                self.search.filter_deactivated_branch = true;
                self.abort_current_task(env);
                self.search.filter_deactivated_branch = false;
            }
            if !self.pending_locked {
                self.pending = Some(match next_task {
                    Some(task) => PendingExecution::Task(task),
                    None => PendingExecution::OutOfNodes,
                });
            }
        }
        self.process_pending_execution(env);
    }

    fn is_valid_search_result(&self, task: NodeIndex, search_end: Option<NodeIndex>) -> bool {
        if let Some(end) = search_end {
            if !task.takes_priority_over(end) {
                tracing::debug!(task = %task, end = %end, "found task lies past the search end");
                return false;
            }
        }
        let Some(instance) = self.instances.get(task.instance_index as usize) else {
            return false;
        };
        let ignores_restart = instance
            .tree
            .layout()
            .task(task.execution_index)
            .map(|t| t.ignore_restart_self)
            .unwrap_or(false);
        if ignores_restart && instance.is_running_task(task.execution_index) {
            tracing::debug!(task = %task, "task is already running and ignores restarts");
            return false;
        }
        true
    }

    /// Step out of `child` after its policy gave up on it.
    fn return_to_parent(
        &mut self,
        child: NodeIndex,
        result: &mut NodeResult,
        env: &mut Env<'_, W>,
    ) -> Option<NodeIndex> {
        let tree = self.tree_at(child.instance_index)?;
        let layout = tree.layout();
        if let (Some(parent), Some(slot)) = (
            layout.parent(child.execution_index),
            layout.child_slot(child.execution_index),
        ) {
            let parent = NodeIndex::new(child.instance_index, parent);
            self.on_child_deactivation(parent, slot, result, env);
            return Some(parent);
        }

        // Left the root composite of an instance.
        self.on_composite_deactivation(child);
        if self.active_instance == 0 {
            self.search.tree_result = Some(*result);
            return None;
        }

        let leaving = self.active_instance;
        self.deactivate_instance_nodes(leaving);
        self.search.pending_notifies.push(DeactivationNotify {
            instance: leaving,
            result: *result,
        });
        self.active_instance -= 1;

        let subtree_task = self.active_node_index()?;
        let (parent, slot) = self.parent_link(subtree_task)?;
        self.on_child_deactivation(parent, slot, result, env);
        Some(parent)
    }

    /// Walk up from the running node until `target`, deactivating every
    /// branch on the way. Returns the slot of `target`'s child that was left.
    fn deactivate_up_to(
        &mut self,
        target: NodeIndex,
        result: &mut NodeResult,
        env: &mut Env<'_, W>,
    ) -> Result<Option<usize>, ()> {
        let mut last_slot = None;
        let mut deactivate_root = true;
        let mut current = self.active_node_index();
        if current.is_none() && self.active_instance > target.instance_index {
            // Instance pushed but never searched.
            current = Some(NodeIndex::new(self.active_instance, 0));
            deactivate_root = false;
        }

        while let Some(node) = current {
            let Some(tree) = self.tree_at(node.instance_index) else {
                break;
            };
            let layout = tree.layout();
            if let (Some(parent), Some(slot)) = (
                layout.parent(node.execution_index),
                layout.child_slot(node.execution_index),
            ) {
                let parent = NodeIndex::new(node.instance_index, parent);
                self.on_child_deactivation(parent, slot, result, env);
                last_slot = Some(slot);
                current = Some(parent);
            } else {
                if deactivate_root {
                    self.deactivate_instance_nodes(self.active_instance);
                }
                deactivate_root = true;
                if self.active_instance == 0 {
                    return Err(());
                }
                self.search.pending_notifies.push(DeactivationNotify {
                    instance: self.active_instance,
                    result: *result,
                });
                self.active_instance -= 1;
                current = self.active_node_index();
            }

            if current == Some(target) {
                break;
            }
        }
        Ok(last_slot)
    }

    fn mark_deactivated_branch(&mut self, composite: NodeIndex, slot: usize) {
        let Some(tree) = self.tree_at(composite.instance_index) else {
            return;
        };
        let layout = tree.layout();
        let start = layout.child_execution_index(composite.execution_index, slot);
        let end = slot
            .checked_add(1)
            .and_then(|next| layout.child_execution_index(composite.execution_index, next));
        if let (Some(start), Some(end)) = (start, end) {
            self.search.extend_deactivated_branch(BranchRange {
                start: NodeIndex::new(composite.instance_index, start),
                end: NodeIndex::new(composite.instance_index, end),
            });
        }
    }

    fn find_child_to_execute(
        &mut self,
        composite: NodeIndex,
        last_result: &mut NodeResult,
        env: &mut Env<'_, W>,
    ) -> ChildStep {
        let current = self
            .instances
            .get(composite.instance_index as usize)
            .and_then(|i| i.cursor(composite.execution_index).current_child);
        let mut step = self.get_next_child(composite, current, *last_result);

        while let ChildStep::Child(slot) = step {
            if self.search.postpone_search {
                break;
            }
            if self.decorators_allow(composite, slot, env) {
                self.on_child_activation(composite, slot, env);
                tracing::trace!(composite = %composite, slot, "child activated");
                return step;
            }
            *last_result = NodeResult::Failed;
            self.notify_decorators_on_failed_activation(composite, slot, last_result, env);
            step = self.get_next_child(composite, Some(slot), *last_result);
        }
        ChildStep::ReturnToParent
    }

    fn get_next_child(
        &mut self,
        composite: NodeIndex,
        last_child: Option<usize>,
        last_result: NodeResult,
    ) -> ChildStep {
        let active = self.active_instance;
        let restart_pending = self.request.map(|r| !r.try_next_child).unwrap_or(false);
        let Some(instance) = self.instances.get_mut(composite.instance_index as usize) else {
            return ChildStep::ReturnToParent;
        };
        let tree = Rc::clone(&instance.tree);
        let Some(def) = tree.layout().composite(composite.execution_index) else {
            return ChildStep::ReturnToParent;
        };

        if let (None, Some(start)) = (last_child, self.search.search_start) {
            if NodeIndex::new(active, composite.execution_index).takes_priority_over(start) {
                // Only a start in this instance names one of its children.
                let slot = if active == start.instance_index {
                    tree.layout()
                        .matching_child_slot(composite.execution_index, start.execution_index)
                } else {
                    None
                };
                return slot.map(ChildStep::Child).unwrap_or(ChildStep::ReturnToParent);
            }
        }

        if !restart_pending {
            if let Some(cursor) = instance.cursor_mut(composite.execution_index) {
                if let Some(forced) = cursor.override_child.take() {
                    tracing::debug!(composite = %composite, child = forced, "using child override");
                    return if forced < def.children.len() {
                        ChildStep::Child(forced)
                    } else {
                        ChildStep::ReturnToParent
                    };
                }
            }
        }

        def.policy
            .next_child(last_child, last_result, def.children.len())
    }

    fn on_child_activation(&mut self, composite: NodeIndex, slot: usize, env: &mut Env<'_, W>) {
        let Some(tree) = self.tree_at(composite.instance_index) else {
            return;
        };
        let layout = tree.layout();
        let Some(entry) = layout
            .composite(composite.execution_index)
            .and_then(|c| c.children.get(slot))
        else {
            return;
        };

        for &decorator in &entry.decorators {
            let mode = layout
                .decorator(decorator)
                .map(|d| d.abort_mode)
                .unwrap_or_default();
            let node = NodeIndex::new(composite.instance_index, decorator);
            match mode {
                AbortMode::LowerPriority => self.queue_update(node, UpdateMode::Remove),
                AbortMode::SelfOnly | AbortMode::Both => self.queue_update(node, UpdateMode::Add),
                AbortMode::None => {}
            }
        }

        if let ChildNode::Composite(child) = entry.node {
            self.on_node_activation(NodeIndex::new(composite.instance_index, child), env);
        }

        if let Some(cursor) = self
            .instances
            .get_mut(composite.instance_index as usize)
            .and_then(|i| i.cursor_mut(composite.execution_index))
        {
            cursor.current_child = Some(slot);
        }
    }

    fn notify_decorators_on_failed_activation(
        &mut self,
        composite: NodeIndex,
        slot: usize,
        result: &mut NodeResult,
        env: &mut Env<'_, W>,
    ) {
        let Some(tree) = self.tree_at(composite.instance_index) else {
            return;
        };
        let layout = tree.layout();
        let Some(entry) = layout
            .composite(composite.execution_index)
            .and_then(|c| c.children.get(slot))
        else {
            return;
        };

        for &decorator in &entry.decorators {
            let mode = layout
                .decorator(decorator)
                .map(|d| d.abort_mode)
                .unwrap_or_default();
            if matches!(mode, AbortMode::LowerPriority | AbortMode::Both) {
                self.queue_update(
                    NodeIndex::new(composite.instance_index, decorator),
                    UpdateMode::Add,
                );
            }
        }
        self.notify_node_processed(composite.instance_index, &entry.decorators, result, env);
    }

    fn on_child_deactivation(
        &mut self,
        composite: NodeIndex,
        slot: usize,
        result: &mut NodeResult,
        env: &mut Env<'_, W>,
    ) {
        let Some(tree) = self.tree_at(composite.instance_index) else {
            return;
        };
        let layout = tree.layout();
        let Some(entry) = layout
            .composite(composite.execution_index)
            .and_then(|c| c.children.get(slot))
        else {
            return;
        };
        let instance = composite.instance_index;

        match entry.node {
            ChildNode::Task(_) => {
                for &service in &entry.services {
                    self.queue_update(NodeIndex::new(instance, service), UpdateMode::Remove);
                }
            }
            ChildNode::Composite(child) => {
                self.on_composite_deactivation(NodeIndex::new(instance, child));
            }
        }

        if *result == NodeResult::Aborted {
            for &decorator in &entry.decorators {
                self.queue_update(NodeIndex::new(instance, decorator), UpdateMode::Remove);
            }
            return;
        }
        for &decorator in &entry.decorators {
            let mode = layout
                .decorator(decorator)
                .map(|d| d.abort_mode)
                .unwrap_or_default();
            let node = NodeIndex::new(instance, decorator);
            match mode {
                AbortMode::SelfOnly => self.queue_update(node, UpdateMode::Remove),
                AbortMode::LowerPriority => self.queue_update(node, UpdateMode::Add),
                AbortMode::None | AbortMode::Both => {}
            }
        }
        self.notify_node_processed(instance, &entry.decorators, result, env);
    }

    fn notify_node_processed(
        &mut self,
        instance: u16,
        decorators: &[u16],
        result: &mut NodeResult,
        env: &mut Env<'_, W>,
    ) {
        for &decorator in decorators {
            let node = NodeIndex::new(instance, decorator);
            let before = *result;
            self.with_node(env, node, |runtime, ctx| {
                if let NodeRuntime::Decorator(object) = runtime {
                    object.on_node_processed(ctx, result);
                }
            });
            if *result != before {
                tracing::debug!(decorator = %node, from = %before, to = %result, "decorator rewrote result");
            }
        }
    }

    fn on_composite_deactivation(&mut self, composite: NodeIndex) {
        let Some(tree) = self.tree_at(composite.instance_index) else {
            return;
        };
        if let Some(def) = tree.layout().composite(composite.execution_index) {
            for &service in &def.services {
                self.queue_update(
                    NodeIndex::new(composite.instance_index, service),
                    UpdateMode::Remove,
                );
            }
        }
    }

    /// Search entered `composite` from its parent.
    pub(crate) fn on_node_activation(&mut self, composite: NodeIndex, env: &mut Env<'_, W>) {
        let Some(tree) = self.tree_at(composite.instance_index) else {
            return;
        };
        if let Some(cursor) = self
            .instances
            .get_mut(composite.instance_index as usize)
            .and_then(|i| i.cursor_mut(composite.execution_index))
        {
            cursor.current_child = None;
        }
        let Some(def) = tree.layout().composite(composite.execution_index) else {
            return;
        };
        for &service in &def.services {
            let node = NodeIndex::new(composite.instance_index, service);
            self.queue_update(node, UpdateMode::Add);
            self.notify_service_search_start(node, env);
        }
    }

    /// Let a composite service schedule its first tick and react to the
    /// search entering its branch.
    pub(crate) fn notify_service_search_start(&mut self, node: NodeIndex, env: &mut Env<'_, W>) {
        let Some(tree) = self.tree_at(node.instance_index) else {
            return;
        };
        let Some(def) = tree.layout().service(node.execution_index).cloned() else {
            return;
        };
        let due = match self
            .instances
            .get(node.instance_index as usize)
            .and_then(|i| i.nodes.get(node.execution_index as usize))
        {
            Some(NodeRuntime::Service(state)) => state.next_tick_in <= 0.0,
            _ => return,
        };
        let delay = (due || def.call_tick_on_search_start).then(|| self.next_service_delay(&def));

        self.with_node(env, node, |runtime, ctx| {
            let NodeRuntime::Service(state) = runtime else {
                return;
            };
            if let (true, Some(delay)) = (due, delay) {
                state.next_tick_in = delay;
            }
            state.service.on_search_start(ctx);
            if let (true, Some(delay)) = (def.call_tick_on_search_start, delay) {
                state.service.tick(ctx, 0.0);
                state.since_last_tick = 0.0;
                state.next_tick_in = delay;
            }
        });
    }

    pub(crate) fn next_service_delay(&mut self, def: &ServiceDef) -> f32 {
        let low = (def.interval - def.random_deviation).max(0.0);
        let high = def.interval + def.random_deviation;
        if high > low {
            self.rng.range_f32(low, high)
        } else {
            def.interval
        }
    }

    /// Queue removal of every active aux node ranked below `index`.
    pub(crate) fn unregister_aux_nodes_up_to(&mut self, index: NodeIndex) {
        let lower: Vec<NodeIndex> = self
            .instances
            .iter()
            .enumerate()
            .flat_map(|(i, instance)| {
                instance
                    .active_aux
                    .iter()
                    .map(move |&aux| NodeIndex::new(i as u16, aux))
            })
            .filter(|aux| index.takes_priority_over(*aux))
            .collect();
        for aux in lower {
            self.queue_update(aux, UpdateMode::Remove);
        }
    }

    /// Queue removal of every active aux node of one instance.
    pub(crate) fn deactivate_instance_nodes(&mut self, instance: u16) {
        let Some(active) = self
            .instances
            .get(instance as usize)
            .map(|i| i.active_aux.clone())
        else {
            return;
        };
        for &aux in active.iter().rev() {
            self.queue_update(NodeIndex::new(instance, aux), UpdateMode::Remove);
        }
    }

    fn queue_update(&mut self, node: NodeIndex, mode: UpdateMode) {
        let active = self.is_aux_active(node);
        let update = match mode {
            UpdateMode::Add => SearchUpdate::add(node),
            UpdateMode::Remove => SearchUpdate::remove(node),
        };
        if self.search.add_unique_update(update, active) {
            tracing::trace!(node = %node, mode = ?mode, "aux update queued");
        }
    }

    fn snapshot(&self) -> Rollback {
        Rollback {
            active_instance: self.active_instance,
            cursors: self.instances.iter().map(|i| i.memory.clone()).collect(),
            active_nodes: self
                .instances
                .iter()
                .map(|i| (i.active_node, i.active_type))
                .collect(),
            deactivated_branch: self.search.deactivated_branch,
        }
    }

    /// Undo cursor changes and queued updates of the last search.
    pub(crate) fn rollback_search_changes(&mut self) {
        if let Some(rollback) = self.search.rollback.take() {
            self.active_instance = rollback.active_instance;
            self.search.deactivated_branch = rollback.deactivated_branch;
            let saved = rollback.cursors.into_iter().zip(rollback.active_nodes);
            for (instance, (memory, (active_node, active_type))) in
                self.instances.iter_mut().zip(saved)
            {
                instance.memory = memory;
                // Only the root activation done by the search is undone. Task
                // states belong to the abort handling.
                if active_node.is_none() {
                    instance.active_node = None;
                    instance.active_type = active_type;
                }
            }
        }
        self.search.discard();
        self.search.search_start = None;
        self.search.search_end = None;
    }

    pub(crate) fn active_node_index(&self) -> Option<NodeIndex> {
        let instance = self.instances.get(self.active_instance as usize)?;
        Some(NodeIndex::new(self.active_instance, instance.active_node?))
    }

    pub(crate) fn tree_at(&self, instance: u16) -> Option<Rc<BehaviorTree<W>>> {
        self.instances
            .get(instance as usize)
            .map(|i| Rc::clone(&i.tree))
    }
}
