//! Per-entity tree runner.
//!
//! [`TreeComponent`] owns the instance stack (root tree plus pushed
//! subtrees), the accumulated execution request and the search scratch
//! data. Everything runs inside [`TreeComponent::tick`]; calls made between
//! ticks only record what should happen.

mod apply;
mod aux;
mod request;
mod search;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use bt_core::rng::derive_seed;
use bt_core::{
    Blackboard, KeyId, NodeIndex, ObserverResult, SplitMix64, TickContext, WorldMut,
};
use bt_tools::{TraceEvent, TraceLog, TraceSink};

use crate::behavior::NodeContext;
use crate::config::{RunMode, RuntimeConfig};
use crate::instance::{ActiveNodeType, NodeRuntime, TreeInstance};
use crate::search::{ExecutionRequest, PendingExecution, SearchData};
use crate::{BehaviorTree, NodeResult, TreeError};

const SERVICE_STREAM: u64 = 0x5E4F_1CE0;

/// How [`TreeComponent::restart_logic`] restarts a running tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMode {
    /// Search again from the root as if a higher priority branch was
    /// requested. A task that ignores restarts of itself keeps running when
    /// the search lands on it.
    ForceReevaluateRootNode,
    /// Stop everything and start from scratch.
    CompleteRestart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogicState {
    Stopped,
    PendingStart,
    Running,
}

/// Work requested between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    FinishTask(NodeIndex, NodeResult),
    FinishAbort(NodeIndex),
    Branch { composite: NodeIndex, child: usize },
}

/// Snapshot for tools and UIs.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub running: bool,
    pub paused: bool,
    pub instance_count: usize,
    pub active_task: Option<(NodeIndex, String)>,
    pub active_aux: Vec<(NodeIndex, String)>,
    pub last_tree_result: Option<NodeResult>,
}

pub(crate) struct Env<'a, W> {
    pub tick: &'a TickContext,
    pub world: &'a mut W,
}

pub struct TreeComponent<W>
where
    W: WorldMut + 'static,
{
    agent: W::Agent,
    root_tree: Rc<BehaviorTree<W>>,
    config: RuntimeConfig,
    run_mode: RunMode,
    blackboard: Blackboard,
    changed_keys: Rc<RefCell<BTreeSet<KeyId>>>,

    instances: Vec<TreeInstance<W>>,
    active_instance: u16,
    search: SearchData,
    request: Option<ExecutionRequest>,
    pending: Option<PendingExecution>,
    pending_locked: bool,
    search_scheduled: bool,
    waiting_for_aborts: bool,

    state: LogicState,
    paused: bool,
    pending_restart: Option<RestartMode>,
    deferred: Vec<Deferred>,

    time_seconds: f64,
    current_tick: u64,
    passes_this_tick: u32,
    rng: SplitMix64,
    last_result: Option<NodeResult>,

    trace_log: Option<TraceLog>,
    trace_sink: Option<Box<dyn TraceSink>>,
}

impl<W> TreeComponent<W>
where
    W: WorldMut + 'static,
{
    pub fn new(agent: W::Agent, tree: Rc<BehaviorTree<W>>, mut blackboard: Blackboard) -> Self {
        let changed_keys = Rc::new(RefCell::new(BTreeSet::new()));
        let key_ids: Vec<KeyId> = blackboard.def().keys().map(|(id, _)| id).collect();
        for id in key_ids {
            let sink = changed_keys.clone();
            // Keys come from the blackboard's own definition.
            let _ = blackboard.observe(id, move |key, _| {
                sink.borrow_mut().insert(key);
                ObserverResult::Keep
            });
        }

        let config = RuntimeConfig::default();
        Self {
            agent,
            root_tree: tree,
            run_mode: config.default_run_mode,
            rng: SplitMix64::new(derive_seed(config.seed, agent_seed(agent), SERVICE_STREAM)),
            config,
            blackboard,
            changed_keys,
            instances: Vec::new(),
            active_instance: 0,
            search: SearchData::default(),
            request: None,
            pending: None,
            pending_locked: false,
            search_scheduled: false,
            waiting_for_aborts: false,
            state: LogicState::Stopped,
            paused: false,
            pending_restart: None,
            deferred: Vec::new(),
            time_seconds: 0.0,
            current_tick: 0,
            passes_this_tick: 0,
            last_result: None,
            trace_log: None,
            trace_sink: None,
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.run_mode = config.default_run_mode;
        self.rng = SplitMix64::new(derive_seed(
            config.seed,
            agent_seed(self.agent),
            SERVICE_STREAM,
        ));
        self.trace_log = config.trace.then(TraceLog::default);
        self.config = config;
        self
    }

    pub fn with_trace_sink(mut self, sink: Box<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn set_run_mode(&mut self, mode: RunMode) {
        self.run_mode = mode;
    }

    pub fn tree(&self) -> &Rc<BehaviorTree<W>> {
        &self.root_tree
    }

    /// Start running the root tree. The first search happens on the next tick.
    ///
    /// No-op when already running.
    pub fn start_logic(&mut self) -> Result<(), TreeError> {
        if self.state != LogicState::Stopped {
            return Ok(());
        }
        if let Some(def) = self.root_tree.blackboard() {
            if !self.blackboard.is_compatible_with(def) {
                tracing::warn!(
                    tree = %self.root_tree.name(),
                    "blackboard is incompatible with tree, not starting"
                );
                return Err(TreeError::IncompatibleBlackboard {
                    tree: self.root_tree.name().to_string(),
                    expected: def.name().to_string(),
                    actual: self.blackboard.def().name().to_string(),
                });
            }
        }
        self.state = LogicState::PendingStart;
        self.last_result = None;
        Ok(())
    }

    /// Restart on the next tick. Starts the tree when it is stopped.
    pub fn restart_logic(&mut self, mode: RestartMode) {
        match self.state {
            LogicState::Stopped => {
                // Start errors are already logged; the tree just stays stopped.
                let _ = self.start_logic();
            }
            LogicState::PendingStart => {}
            LogicState::Running => self.pending_restart = Some(mode),
        }
    }

    /// Abort the running task, deactivate every aux node and drop all
    /// instances.
    pub fn stop_logic(&mut self, ctx: &TickContext, world: &mut W) {
        let mut env = Env { tick: ctx, world };
        match self.state {
            LogicState::Stopped => {}
            LogicState::PendingStart => self.state = LogicState::Stopped,
            LogicState::Running => self.stop_tree(&mut env),
        }
    }

    pub fn pause_logic(&mut self) {
        if self.state != LogicState::Stopped && !self.paused {
            tracing::debug!(tree = %self.root_tree.name(), "behavior tree paused");
            self.paused = true;
        }
    }

    pub fn resume_logic(&mut self) {
        if self.paused {
            tracing::debug!(tree = %self.root_tree.name(), "behavior tree resumed");
            self.paused = false;
            if self.request.is_some() {
                self.search_scheduled = true;
            }
        }
    }

    /// Finish a task that returned `InProgress`. Applied on the next tick.
    pub fn finish_latent_task(&mut self, task: NodeIndex, result: NodeResult) -> Result<(), TreeError> {
        self.check_node(task)?;
        self.deferred.push(Deferred::FinishTask(task, result));
        Ok(())
    }

    /// Complete an abort that returned `InProgress`. Applied on the next tick.
    pub fn finish_latent_abort(&mut self, task: NodeIndex) -> Result<(), TreeError> {
        self.check_node(task)?;
        self.deferred.push(Deferred::FinishAbort(task));
        Ok(())
    }

    /// Force `composite` to continue with `child` next, bypassing its policy
    /// once. Decorators of the child are still checked.
    pub fn request_branch(&mut self, composite: NodeIndex, child: usize) -> Result<(), TreeError> {
        self.check_node(composite)?;
        let layout = self.instances[composite.instance_index as usize].tree.layout();
        let known = layout
            .composite(composite.execution_index)
            .map(|c| child < c.children.len())
            .unwrap_or(false);
        if !known {
            return Err(TreeError::UnknownNode(composite));
        }
        self.deferred.push(Deferred::Branch { composite, child });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state != LogicState::Stopped
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Task currently running on top of the instance stack.
    pub fn active_task(&self) -> Option<NodeIndex> {
        let (index, instance) = self.instances.iter().enumerate().last()?;
        match instance.active_type {
            ActiveNodeType::ActiveTask | ActiveNodeType::AbortingTask => instance
                .active_node
                .map(|node| NodeIndex::new(index as u16, node)),
            _ => None,
        }
    }

    pub fn active_task_name(&self) -> Option<&str> {
        let task = self.active_task()?;
        Some(self.node_name(task))
    }

    pub fn node_name(&self, node: NodeIndex) -> &str {
        self.instances
            .get(node.instance_index as usize)
            .map(|i| i.tree.node_name(node.execution_index))
            .unwrap_or("<unknown>")
    }

    pub fn is_aux_active(&self, node: NodeIndex) -> bool {
        self.instances
            .get(node.instance_index as usize)
            .map(|i| i.is_aux_active(node.execution_index))
            .unwrap_or(false)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn last_tree_result(&self) -> Option<NodeResult> {
        self.last_result
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    /// Writes made here are picked up at the start of the next tick.
    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    pub fn trace_log(&self) -> Option<&TraceLog> {
        self.trace_log.as_ref()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let active_aux = self
            .instances
            .iter()
            .enumerate()
            .flat_map(|(i, instance)| {
                instance.active_aux.iter().map(move |&node| {
                    (
                        NodeIndex::new(i as u16, node),
                        instance.tree.node_name(node).to_string(),
                    )
                })
            })
            .collect();
        Diagnostics {
            running: self.is_running(),
            paused: self.paused,
            instance_count: self.instances.len(),
            active_task: self
                .active_task()
                .map(|task| (task, self.node_name(task).to_string())),
            active_aux,
            last_tree_result: self.last_result,
        }
    }

    fn check_node(&self, node: NodeIndex) -> Result<(), TreeError> {
        if self.state != LogicState::Running {
            return Err(TreeError::NotRunning);
        }
        let exists = self
            .instances
            .get(node.instance_index as usize)
            .map(|i| (node.execution_index as usize) < i.tree.layout().len())
            .unwrap_or(false);
        if exists {
            Ok(())
        } else {
            Err(TreeError::UnknownNode(node))
        }
    }

    /// Run `f` on the runtime object of `node` with a fresh node context.
    fn with_node<R>(
        &mut self,
        env: &mut Env<'_, W>,
        node: NodeIndex,
        f: impl FnOnce(&mut NodeRuntime<W>, &mut NodeContext<'_, W>) -> R,
    ) -> Option<R> {
        let Self {
            instances,
            blackboard,
            agent,
            time_seconds,
            ..
        } = self;
        let runtime = instances
            .get_mut(node.instance_index as usize)?
            .nodes
            .get_mut(node.execution_index as usize)?;
        let mut ctx = NodeContext {
            tick: env.tick,
            time_seconds: *time_seconds,
            agent: *agent,
            world: &mut *env.world,
            blackboard,
            node,
        };
        Some(f(runtime, &mut ctx))
    }

    fn trace(&mut self, tag: &'static str, a: u64, b: u64) {
        if self.trace_log.is_none() && self.trace_sink.is_none() {
            return;
        }
        let event = TraceEvent::new(self.current_tick, tag).with_a(a).with_b(b);
        if let Some(log) = self.trace_log.as_mut() {
            log.push(event.clone());
        }
        if let Some(sink) = self.trace_sink.as_mut() {
            sink.emit(event);
        }
    }

    fn trace_node(&mut self, tag: &'static str, node: NodeIndex) {
        self.trace(
            tag,
            node.instance_index as u64,
            node.execution_index as u64,
        );
    }
}

fn agent_seed<A: bt_core::AgentId>(agent: A) -> u64 {
    agent.stable_id()
}

impl<W> core::fmt::Debug for TreeComponent<W>
where
    W: WorldMut + 'static,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TreeComponent")
            .field("agent", &self.agent)
            .field("tree", &self.root_tree.name())
            .field("state", &self.state)
            .field("paused", &self.paused)
            .field("instances", &self.instances.len())
            .field("active_task", &self.active_task())
            .finish()
    }
}
