//! Mutable state of one pushed tree instance.

use std::rc::Rc;

use bt_core::WorldMut;

use crate::behavior::{Decorator, Service, Task};
use crate::tree::{BehaviorTree, NodeTemplate};

/// Runtime cursor of a composite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositeMemory {
    pub current_child: Option<usize>,
    /// One-shot child forced by an external request.
    pub override_child: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveNodeType {
    Composite,
    ActiveTask,
    AbortingTask,
    InactiveTask,
}

pub(crate) struct ServiceState<W>
where
    W: WorldMut + 'static,
{
    pub service: Box<dyn Service<W>>,
    pub next_tick_in: f32,
    pub since_last_tick: f32,
}

pub(crate) enum NodeRuntime<W>
where
    W: WorldMut + 'static,
{
    Composite,
    Task(Box<dyn Task<W>>),
    Subtree(Rc<BehaviorTree<W>>),
    Decorator(Box<dyn Decorator<W>>),
    Service(ServiceState<W>),
}

pub(crate) struct TreeInstance<W>
where
    W: WorldMut + 'static,
{
    pub tree: Rc<BehaviorTree<W>>,
    pub active_node: Option<u16>,
    pub active_type: ActiveNodeType,
    /// Indexed by execution index; only composite slots are ever read.
    pub memory: Vec<CompositeMemory>,
    pub nodes: Vec<NodeRuntime<W>>,
    /// Active decorators and services, kept sorted by execution index.
    pub active_aux: Vec<u16>,
}

impl<W> TreeInstance<W>
where
    W: WorldMut + 'static,
{
    pub fn new(tree: Rc<BehaviorTree<W>>) -> Self {
        let len = tree.layout().len();
        let nodes = (0..len as u16)
            .map(|index| match tree.template(index) {
                Some(NodeTemplate::Task(factory)) => NodeRuntime::Task(factory()),
                Some(NodeTemplate::Subtree(sub)) => NodeRuntime::Subtree(sub.clone()),
                Some(NodeTemplate::Decorator(factory)) => NodeRuntime::Decorator(factory()),
                Some(NodeTemplate::Service(factory)) => NodeRuntime::Service(ServiceState {
                    service: factory(),
                    next_tick_in: 0.0,
                    since_last_tick: 0.0,
                }),
                Some(NodeTemplate::Composite) | None => NodeRuntime::Composite,
            })
            .collect();

        Self {
            tree,
            active_node: None,
            active_type: ActiveNodeType::Composite,
            memory: vec![CompositeMemory::default(); len],
            nodes,
            active_aux: Vec::new(),
        }
    }

    pub fn is_aux_active(&self, index: u16) -> bool {
        self.active_aux.binary_search(&index).is_ok()
    }

    pub fn add_active_aux(&mut self, index: u16) -> bool {
        match self.active_aux.binary_search(&index) {
            Ok(_) => false,
            Err(pos) => {
                self.active_aux.insert(pos, index);
                true
            }
        }
    }

    pub fn remove_active_aux(&mut self, index: u16) -> bool {
        match self.active_aux.binary_search(&index) {
            Ok(pos) => {
                self.active_aux.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn cursor(&self, composite: u16) -> CompositeMemory {
        self.memory
            .get(composite as usize)
            .copied()
            .unwrap_or_default()
    }

    pub fn cursor_mut(&mut self, composite: u16) -> Option<&mut CompositeMemory> {
        self.memory.get_mut(composite as usize)
    }

    /// The task at `index` is this instance's running task.
    pub fn is_running_task(&self, index: u16) -> bool {
        self.active_node == Some(index)
            && matches!(
                self.active_type,
                ActiveNodeType::ActiveTask | ActiveNodeType::AbortingTask
            )
    }
}
