//! Per-frame driver: deferred calls, blackboard observers, aux node ticks
//! and the active task.

use bt_core::{KeyId, NodeIndex, TickContext, WorldMut};

use super::{Deferred, Env, LogicState, TreeComponent};
use crate::behavior::DecoratorSignal;
use crate::instance::{ActiveNodeType, NodeRuntime};
use crate::NodeResult;

impl<W> TreeComponent<W>
where
    W: WorldMut + 'static,
{
    /// Advance the tree by one frame.
    pub fn tick(&mut self, ctx: &TickContext, world: &mut W) {
        let mut env = Env { tick: ctx, world };
        self.current_tick = ctx.tick;
        self.time_seconds += f64::from(ctx.dt_seconds);
        self.passes_this_tick = 0;

        if let Some(mode) = self.pending_restart.take() {
            if self.state == LogicState::Running {
                self.apply_restart(mode, &mut env);
            }
        }
        if self.state == LogicState::PendingStart {
            self.initialize(&mut env);
        }
        if self.state != LogicState::Running || self.paused {
            return;
        }

        self.process_deferred(&mut env);
        self.process_blackboard_changes(&mut env);
        self.run_scheduled_searches(&mut env);

        self.tick_aux_nodes(ctx.dt_seconds, &mut env);
        self.process_blackboard_changes(&mut env);
        self.tick_active_task(ctx.dt_seconds, &mut env);
        self.process_blackboard_changes(&mut env);
        self.run_scheduled_searches(&mut env);
    }

    fn run_scheduled_searches(&mut self, env: &mut Env<'_, W>) {
        while self.search_scheduled && self.state == LogicState::Running {
            if self.passes_this_tick >= self.config.max_search_passes_per_tick {
                tracing::debug!(
                    passes = self.passes_this_tick,
                    "search pass limit reached, continuing next tick"
                );
                break;
            }
            self.passes_this_tick += 1;
            self.process_execution_request(env);
        }
    }

    fn process_deferred(&mut self, env: &mut Env<'_, W>) {
        for deferred in std::mem::take(&mut self.deferred) {
            if self.state != LogicState::Running {
                return;
            }
            match deferred {
                Deferred::FinishTask(task, result) => {
                    let running = self
                        .instances
                        .get(task.instance_index as usize)
                        .map(|i| {
                            i.active_node == Some(task.execution_index)
                                && i.active_type == ActiveNodeType::ActiveTask
                        })
                        .unwrap_or(false);
                    if running {
                        self.on_task_finished(task, result, env);
                    } else {
                        tracing::debug!(task = %task, "latent finish for a task that is not running");
                    }
                }
                Deferred::FinishAbort(task) => {
                    let aborting = self
                        .instances
                        .get(task.instance_index as usize)
                        .map(|i| {
                            i.active_node == Some(task.execution_index)
                                && i.active_type == ActiveNodeType::AbortingTask
                        })
                        .unwrap_or(false);
                    if aborting {
                        self.on_task_finished(task, NodeResult::Aborted, env);
                    } else {
                        tracing::debug!(task = %task, "latent abort finish for a task that is not aborting");
                    }
                }
                Deferred::Branch { composite, child } => self.activate_branch(composite, child, env),
            }
        }
    }

    fn activate_branch(&mut self, composite: NodeIndex, child: usize, env: &mut Env<'_, W>) {
        if !self.is_on_active_path(composite) {
            tracing::warn!(composite = %composite, "branch request outside the running branch ignored");
            return;
        }
        let Some(tree) = self.tree_at(composite.instance_index) else {
            return;
        };
        let Some(first) = tree
            .layout()
            .child_execution_index(composite.execution_index, 0)
        else {
            return;
        };
        if let Some(cursor) = self
            .instances
            .get_mut(composite.instance_index as usize)
            .and_then(|i| i.cursor_mut(composite.execution_index))
        {
            cursor.override_child = Some(child);
        }
        tracing::debug!(composite = %composite, child, "branch requested");
        self.request_execution(
            composite,
            NodeIndex::new(composite.instance_index, first),
            None,
            NodeResult::Failed,
            env,
        );
    }

    fn is_on_active_path(&self, composite: NodeIndex) -> bool {
        let top = self.instances.len().saturating_sub(1);
        let mut current = self
            .instances
            .get(top)
            .and_then(|i| i.active_node)
            .map(|node| NodeIndex::new(top as u16, node));
        while let Some(node) = current {
            if node == composite {
                return true;
            }
            current = self.parent_link(node).map(|(parent, _)| parent);
        }
        false
    }

    /// Re-check active decorators that observe a key written since the last
    /// call.
    pub(crate) fn process_blackboard_changes(&mut self, env: &mut Env<'_, W>) {
        let changed: Vec<KeyId> = std::mem::take(&mut *self.changed_keys.borrow_mut())
            .into_iter()
            .collect();
        if changed.is_empty() {
            return;
        }

        let observers: Vec<NodeIndex> = self
            .instances
            .iter()
            .enumerate()
            .flat_map(|(i, instance)| {
                let layout = instance.tree.layout();
                instance
                    .active_aux
                    .iter()
                    .filter(|&&aux| {
                        layout
                            .decorator(aux)
                            .map(|d| d.observed_keys.iter().any(|key| changed.contains(key)))
                            .unwrap_or(false)
                    })
                    .map(move |&aux| NodeIndex::new(i as u16, aux))
                    .collect::<Vec<_>>()
            })
            .collect();

        for decorator in observers {
            tracing::trace!(decorator = %decorator, "observed blackboard key changed");
            self.evaluate_decorator(decorator, env);
        }
    }

    fn tick_aux_nodes(&mut self, dt_seconds: f32, env: &mut Env<'_, W>) {
        let active: Vec<NodeIndex> = self
            .instances
            .iter()
            .enumerate()
            .flat_map(|(i, instance)| {
                instance
                    .active_aux
                    .iter()
                    .map(move |&aux| NodeIndex::new(i as u16, aux))
            })
            .collect();

        for node in active {
            let Some(tree) = self.tree_at(node.instance_index) else {
                continue;
            };
            let layout = tree.layout();
            if let Some(def) = layout.service(node.execution_index) {
                let due = match self
                    .instances
                    .get_mut(node.instance_index as usize)
                    .and_then(|i| i.nodes.get_mut(node.execution_index as usize))
                {
                    Some(NodeRuntime::Service(state)) => {
                        state.next_tick_in -= dt_seconds;
                        state.since_last_tick += dt_seconds;
                        state.next_tick_in <= 0.0
                    }
                    _ => false,
                };
                if !due {
                    continue;
                }
                let delay = self.next_service_delay(def);
                self.with_node(env, node, |runtime, ctx| {
                    if let NodeRuntime::Service(state) = runtime {
                        let elapsed = std::mem::take(&mut state.since_last_tick);
                        state.service.tick(ctx, elapsed);
                        state.next_tick_in = delay;
                    }
                });
                self.trace_node("bt.service.tick", node);
            } else if layout.decorator(node.execution_index).is_some() {
                let signal = self
                    .with_node(env, node, |runtime, ctx| match runtime {
                        NodeRuntime::Decorator(decorator) => decorator.tick(ctx, dt_seconds),
                        _ => DecoratorSignal::Unchanged,
                    })
                    .unwrap_or(DecoratorSignal::Unchanged);
                if signal == DecoratorSignal::Reevaluate {
                    self.evaluate_decorator(node, env);
                }
            }
        }
    }

    fn tick_active_task(&mut self, dt_seconds: f32, env: &mut Env<'_, W>) {
        let Some(top) = self.instances.len().checked_sub(1) else {
            return;
        };
        let (Some(task), active_type) = self
            .instances
            .get(top)
            .map(|i| (i.active_node, i.active_type))
            .unwrap_or((None, ActiveNodeType::Composite))
        else {
            return;
        };
        let task = NodeIndex::new(top as u16, task);
        if !matches!(
            active_type,
            ActiveNodeType::ActiveTask | ActiveNodeType::AbortingTask
        ) {
            return;
        }

        let result = self
            .with_node(env, task, |runtime, ctx| match runtime {
                NodeRuntime::Task(object) => object.tick(ctx, dt_seconds),
                _ => NodeResult::InProgress,
            })
            .unwrap_or(NodeResult::InProgress);
        if !result.is_finished() {
            return;
        }

        // The tick may have finished the task through another path.
        let still_same = self
            .instances
            .get(top)
            .map(|i| i.active_node == Some(task.execution_index) && i.active_type == active_type)
            .unwrap_or(false);
        if !still_same {
            return;
        }
        let result = if active_type == ActiveNodeType::AbortingTask {
            NodeResult::Aborted
        } else {
            result
        };
        self.on_task_finished(task, result, env);
    }
}
