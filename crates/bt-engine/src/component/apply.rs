//! Applying a finished search: aux node updates, instance stack changes,
//! task execution and tree completion.

use std::rc::Rc;

use bt_core::{NodeIndex, WorldMut};

use super::{Env, LogicState, RestartMode, TreeComponent};
use crate::config::RunMode;
use crate::instance::{ActiveNodeType, NodeRuntime, TreeInstance};
use crate::search::{PendingExecution, SearchUpdate, UpdateMode};
use crate::{BehaviorTree, NodeResult};

impl<W> TreeComponent<W>
where
    W: WorldMut + 'static,
{
    pub(crate) fn process_pending_execution(&mut self, env: &mut Env<'_, W>) {
        if self.waiting_for_aborts {
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        let next_task = match pending {
            PendingExecution::Task(task) => Some(task),
            PendingExecution::OutOfNodes => None,
        };

        // Aux nodes ranked below the new task are left behind, including
        // any a search forced back to revisit.
        self.unregister_aux_nodes_up_to(next_task.unwrap_or(NodeIndex::ROOT));
        self.apply_search_data(env);

        let keep = self.active_instance as usize + 1;
        while self.instances.len() > keep {
            let popped = self.instances.len() - 1;
            self.instances.pop();
            self.trace("bt.instance.pop", popped as u64, 0);
            tracing::debug!(instance = popped, "subtree instance popped");
        }

        match next_task {
            Some(task) => self.execute_task(task, env),
            None => self.on_tree_finished(env),
        }
    }

    fn apply_search_data(&mut self, env: &mut Env<'_, W>) {
        self.search.rollback = None;

        for notify in std::mem::take(&mut self.search.pending_notifies) {
            self.finish_subtree_task(notify.instance, notify.result);
        }

        let updates = std::mem::take(&mut self.search.pending_updates);
        self.search.filter_deactivated_branch = true;
        for update in updates {
            self.apply_update(update, env);
        }
        self.search.filter_deactivated_branch = false;
        self.search.deactivated_branch = None;
    }

    /// The search left instance `leaving`; the task that pushed it, in the
    /// instance below, finishes with the subtree's result.
    fn finish_subtree_task(&mut self, leaving: u16, result: NodeResult) {
        let Some(owner) = leaving.checked_sub(1) else {
            return;
        };
        let Some(instance) = self.instances.get_mut(owner as usize) else {
            return;
        };
        let Some(task) = instance.active_node else {
            return;
        };
        let runs_subtree = matches!(
            instance.nodes.get(task as usize),
            Some(NodeRuntime::Subtree(_))
        );
        if !runs_subtree || !instance.is_running_task(task) {
            return;
        }
        instance.active_type = ActiveNodeType::InactiveTask;

        self.trace("bt.task.finished", task as u64, result.trace_code());
        tracing::debug!(
            task = %NodeIndex::new(owner, task),
            instance = leaving,
            result = %result,
            "subtree task finished"
        );
    }

    fn apply_update(&mut self, update: SearchUpdate, env: &mut Env<'_, W>) {
        let node = update.node;
        let Some(instance) = self.instances.get_mut(node.instance_index as usize) else {
            return;
        };
        let layout = instance.tree.layout();
        let index = node.execution_index;

        // Services on the root of the root tree live until the tree stops.
        let root_service = node.instance_index == 0
            && layout.service(index).is_some()
            && layout.parent(index) == Some(layout.root())
            && layout.child_slot(index).is_none();
        if root_service && (update.mode == UpdateMode::Remove || instance.is_aux_active(index)) {
            return;
        }

        let changed = match update.mode {
            UpdateMode::Add => instance.add_active_aux(index),
            UpdateMode::Remove => instance.remove_active_aux(index),
        };
        if changed {
            self.set_aux_relevant(node, update.mode == UpdateMode::Add, env);
        }
    }

    /// Call the relevance hook of a decorator or service.
    pub(crate) fn set_aux_relevant(&mut self, node: NodeIndex, relevant: bool, env: &mut Env<'_, W>) {
        self.with_node(env, node, |runtime, ctx| match runtime {
            NodeRuntime::Decorator(decorator) if relevant => decorator.on_become_relevant(ctx),
            NodeRuntime::Decorator(decorator) => decorator.on_cease_relevant(ctx),
            NodeRuntime::Service(state) if relevant => {
                state.since_last_tick = 0.0;
                state.service.on_become_relevant(ctx);
            }
            NodeRuntime::Service(state) => state.service.on_cease_relevant(ctx),
            _ => {}
        });
        let tag = if relevant { "bt.aux.add" } else { "bt.aux.remove" };
        self.trace_node(tag, node);
        tracing::trace!(node = %node, relevant, "aux node relevance changed");
    }

    fn execute_task(&mut self, task: NodeIndex, env: &mut Env<'_, W>) {
        let Some(tree) = self.tree_at(task.instance_index) else {
            return;
        };
        let layout = tree.layout();
        let services = layout
            .parent(task.execution_index)
            .and_then(|parent| layout.composite(parent))
            .zip(layout.child_slot(task.execution_index))
            .and_then(|(composite, slot)| composite.children.get(slot))
            .map(|entry| entry.services.as_slice())
            .unwrap_or_default();

        // Task services start right before the task, after any abort.
        for &service in services {
            let added = self
                .instances
                .get_mut(task.instance_index as usize)
                .map(|i| i.add_active_aux(service))
                .unwrap_or(false);
            if added {
                self.set_aux_relevant(NodeIndex::new(task.instance_index, service), true, env);
            }
        }

        let subtree = match self.instances.get_mut(task.instance_index as usize) {
            Some(instance) => {
                instance.active_node = Some(task.execution_index);
                instance.active_type = ActiveNodeType::ActiveTask;
                match instance.nodes.get(task.execution_index as usize) {
                    Some(NodeRuntime::Subtree(subtree)) => Some(Rc::clone(subtree)),
                    _ => None,
                }
            }
            None => return,
        };
        self.trace_node("bt.task.execute", task);
        tracing::debug!(task = %task, name = %tree.node_name(task.execution_index), "executing task");

        let result = match subtree {
            Some(subtree) => {
                if self.push_instance(subtree, env) {
                    NodeResult::InProgress
                } else {
                    NodeResult::Failed
                }
            }
            None => self
                .with_node(env, task, |runtime, ctx| match runtime {
                    NodeRuntime::Task(object) => object.execute(ctx),
                    _ => NodeResult::Failed,
                })
                .unwrap_or(NodeResult::Failed),
        };

        // A pushed subtree or a nested finish already moved on.
        if self.active_node_index() == Some(task) {
            self.on_task_finished(task, result, env);
        }
    }

    /// Push a tree instance and request its first search.
    pub(crate) fn push_instance(&mut self, tree: Rc<BehaviorTree<W>>, env: &mut Env<'_, W>) -> bool {
        if let Some(def) = tree.blackboard() {
            if !self.blackboard.is_compatible_with(def) {
                tracing::warn!(
                    tree = %tree.name(),
                    blackboard = %self.blackboard.def().name(),
                    "blackboard is incompatible with subtree, not pushing"
                );
                return false;
            }
        }
        let Ok(index) = u16::try_from(self.instances.len()) else {
            tracing::warn!(tree = %tree.name(), "instance stack is full");
            return false;
        };

        self.instances.push(TreeInstance::new(Rc::clone(&tree)));
        self.active_instance = index;
        self.trace("bt.instance.push", index as u64, 0);
        tracing::debug!(tree = %tree.name(), instance = index, "tree instance pushed");

        let layout = tree.layout();
        let root_services = layout
            .composite(layout.root())
            .map(|c| c.services.as_slice())
            .unwrap_or_default();
        for &service in root_services {
            let added = self
                .instances
                .get_mut(index as usize)
                .map(|i| i.add_active_aux(service))
                .unwrap_or(false);
            if added {
                self.set_aux_relevant(NodeIndex::new(index, service), true, env);
            }
        }

        let root = NodeIndex::new(index, layout.root());
        self.request_execution(root, root, None, NodeResult::InProgress, env);
        true
    }

    pub(crate) fn on_task_finished(&mut self, task: NodeIndex, result: NodeResult, env: &mut Env<'_, W>) {
        if result == NodeResult::InProgress {
            self.update_aborting_tasks();
            return;
        }
        if self.instances.get(task.instance_index as usize).is_none() {
            return;
        }

        let was_waiting = self.waiting_for_aborts;
        self.trace("bt.task.finished", task.execution_index as u64, result.trace_code());
        tracing::debug!(task = %task, result = %result, "task finished");
        self.with_node(env, task, |runtime, ctx| {
            if let NodeRuntime::Task(object) = runtime {
                object.on_finished(ctx, result);
            }
        });

        if self.active_node_index() == Some(task) {
            let was_aborting = self
                .instances
                .get_mut(task.instance_index as usize)
                .map(|instance| {
                    let aborting = instance.active_type == ActiveNodeType::AbortingTask;
                    instance.active_type = ActiveNodeType::InactiveTask;
                    aborting
                })
                .unwrap_or(false);
            if !was_aborting {
                if let Some((parent, _)) = self.parent_link(task) {
                    self.request_execution(parent, task, None, result, env);
                }
            }
        } else if result == NodeResult::Aborted {
            // The search already moved the active instance elsewhere.
            if let Some(instance) = self.instances.get_mut(task.instance_index as usize) {
                if instance.active_node == Some(task.execution_index) {
                    instance.active_type = ActiveNodeType::InactiveTask;
                }
            }
        }

        self.update_aborting_tasks();
        if was_waiting && !self.waiting_for_aborts {
            if self.pending.is_some() {
                self.process_pending_execution(env);
            } else if self.request.is_some() {
                self.search_scheduled = true;
            }
        }
    }

    fn update_aborting_tasks(&mut self) {
        self.waiting_for_aborts = self
            .instances
            .last()
            .map(|i| i.active_type == ActiveNodeType::AbortingTask)
            .unwrap_or(false);
    }

    pub(crate) fn abort_current_task(&mut self, env: &mut Env<'_, W>) {
        let Some(top) = self.instances.len().checked_sub(1) else {
            return;
        };
        let Some(task) = self.instances.get_mut(top).and_then(|instance| {
            instance.active_type = ActiveNodeType::AbortingTask;
            instance.active_node
        }) else {
            return;
        };
        let task = NodeIndex::new(top as u16, task);

        self.trace_node("bt.task.abort", task);
        tracing::debug!(task = %task, "aborting task");
        let result = self
            .with_node(env, task, |runtime, ctx| match runtime {
                NodeRuntime::Task(object) => object.abort(ctx),
                _ => NodeResult::Aborted,
            })
            .unwrap_or(NodeResult::Aborted);
        // Any finished answer to an abort counts as aborted.
        let result = if result.is_finished() {
            NodeResult::Aborted
        } else {
            NodeResult::InProgress
        };

        let still_aborting = self
            .instances
            .get(top)
            .map(|i| {
                i.active_node == Some(task.execution_index)
                    && i.active_type == ActiveNodeType::AbortingTask
            })
            .unwrap_or(false);
        if still_aborting {
            self.on_task_finished(task, result, env);
        }
    }

    fn on_tree_finished(&mut self, env: &mut Env<'_, W>) {
        let result = self.search.tree_result.take().unwrap_or(NodeResult::Failed);
        self.last_result = Some(result);
        self.active_instance = 0;
        self.trace("bt.tree.finished", 0, result.trace_code());
        tracing::info!(tree = %self.root_tree.name(), result = %result, "behavior tree finished");

        match self.run_mode {
            RunMode::Looped => {
                if let Some(root) = self.instances.first_mut() {
                    root.active_node = None;
                    root.active_type = ActiveNodeType::Composite;
                }
                self.unregister_aux_nodes_up_to(NodeIndex::ROOT);
                self.apply_search_data(env);
                self.request_execution(
                    NodeIndex::ROOT,
                    NodeIndex::ROOT,
                    None,
                    NodeResult::InProgress,
                    env,
                );
            }
            RunMode::SingleRun => self.stop_tree(env),
        }
    }

    /// Abort running tasks, drop every aux node and instance.
    pub(crate) fn stop_tree(&mut self, env: &mut Env<'_, W>) {
        for index in (0..self.instances.len()).rev() {
            let instance_index = index as u16;
            let aux = std::mem::take(&mut self.instances[index].active_aux);
            for node in aux {
                self.set_aux_relevant(NodeIndex::new(instance_index, node), false, env);
            }

            let (active_node, active_type) = {
                let instance = &self.instances[index];
                (instance.active_node, instance.active_type)
            };
            let Some(task) = active_node.map(|node| NodeIndex::new(instance_index, node)) else {
                continue;
            };
            match active_type {
                ActiveNodeType::ActiveTask => {
                    self.trace_node("bt.task.abort", task);
                    self.with_node(env, task, |runtime, ctx| {
                        if let NodeRuntime::Task(object) = runtime {
                            let mut result = object.abort(ctx);
                            if !result.is_finished() {
                                tracing::debug!(task = %ctx.node, "latent abort cut short by stop");
                                result = NodeResult::Aborted;
                            }
                            object.on_finished(ctx, result);
                        }
                    });
                }
                ActiveNodeType::AbortingTask => {
                    self.with_node(env, task, |runtime, ctx| {
                        if let NodeRuntime::Task(object) = runtime {
                            object.on_finished(ctx, NodeResult::Aborted);
                        }
                    });
                }
                ActiveNodeType::Composite | ActiveNodeType::InactiveTask => {}
            }
        }

        self.instances.clear();
        self.search.reset();
        self.request = None;
        self.pending = None;
        self.pending_locked = false;
        self.search_scheduled = false;
        self.waiting_for_aborts = false;
        self.active_instance = 0;
        self.deferred.clear();
        self.pending_restart = None;
        self.paused = false;
        self.changed_keys.borrow_mut().clear();
        self.state = LogicState::Stopped;

        self.trace("bt.tree.stopped", 0, 0);
        tracing::info!(tree = %self.root_tree.name(), "behavior tree stopped");
    }

    pub(crate) fn initialize(&mut self, env: &mut Env<'_, W>) {
        self.state = LogicState::Running;
        self.trace("bt.tree.started", 0, 0);
        tracing::info!(tree = %self.root_tree.name(), agent = ?self.agent, "behavior tree started");

        let tree = Rc::clone(&self.root_tree);
        if !self.push_instance(tree, env) {
            tracing::warn!(tree = %self.root_tree.name(), "root tree could not be pushed");
            self.state = LogicState::Stopped;
        }
    }

    pub(crate) fn apply_restart(&mut self, mode: RestartMode, env: &mut Env<'_, W>) {
        tracing::info!(tree = %self.root_tree.name(), mode = ?mode, "restarting behavior tree");
        match mode {
            RestartMode::ForceReevaluateRootNode => self.request_execution(
                NodeIndex::ROOT,
                NodeIndex::ROOT,
                None,
                NodeResult::Aborted,
                env,
            ),
            RestartMode::CompleteRestart => {
                self.stop_tree(env);
                self.last_result = None;
                self.initialize(env);
            }
        }
    }
}
