//! Nested tree descriptions and their flattening into a [`TreeLayout`].
//!
//! Execution indices are handed out depth-first: a composite, then its
//! services, then for every child entry its decorators, the services of a
//! task child, and finally the child itself (recursively for composites).

use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use bt_core::{BlackboardDef, KeyId, WorldMut};

use crate::behavior::{Decorator, Service, Task};
use crate::logic::{self, LogicDefect, LogicOp};
use crate::node::{
    AbortMode, ChildEntry, ChildNode, CompositeDef, CompositePolicy, DecoratorDef, NodeDef,
    NodeKind, ServiceDef, TaskDef, TreeLayout,
};
use crate::tree::{BehaviorTree, DecoratorFactory, NodeTemplate, ServiceFactory, TaskFactory};
use crate::BuildError;

/// Highest number of nodes a single tree may hold. One index stays free so
/// "one past the root subtree" is always representable.
pub const MAX_TREE_NODES: usize = u16::MAX as usize;

pub struct TreeBuilder<W>
where
    W: WorldMut + 'static,
{
    name: String,
    blackboard: Option<Arc<BlackboardDef>>,
    _world: PhantomData<fn() -> W>,
}

impl<W> TreeBuilder<W>
where
    W: WorldMut + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blackboard: None,
            _world: PhantomData,
        }
    }

    pub fn blackboard(mut self, def: Arc<BlackboardDef>) -> Self {
        self.blackboard = Some(def);
        self
    }

    pub fn build(self, root: CompositeSpec<W>) -> Result<Rc<BehaviorTree<W>>, BuildError> {
        let mut flat = Flattener {
            tree: &self.name,
            nodes: Vec::new(),
            templates: Vec::new(),
        };
        flat.composite(root, None, None, 0)?;

        tracing::debug!(tree = %self.name, nodes = flat.nodes.len(), "behavior tree built");
        let Flattener {
            nodes, templates, ..
        } = flat;
        Ok(Rc::new(BehaviorTree::from_parts(
            self.name,
            TreeLayout::new(nodes),
            templates,
            self.blackboard,
        )))
    }
}

pub struct CompositeSpec<W>
where
    W: WorldMut + 'static,
{
    name: String,
    policy: CompositePolicy,
    services: Vec<ServiceSpec<W>>,
    children: Vec<ChildSpec<W>>,
}

impl<W> CompositeSpec<W>
where
    W: WorldMut + 'static,
{
    pub fn new(name: impl Into<String>, policy: CompositePolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            services: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn sequence(name: impl Into<String>) -> Self {
        Self::new(name, CompositePolicy::Sequence)
    }

    pub fn selector(name: impl Into<String>) -> Self {
        Self::new(name, CompositePolicy::Selector)
    }

    pub fn service(mut self, service: ServiceSpec<W>) -> Self {
        self.services.push(service);
        self
    }

    pub fn child(mut self, child: ChildSpec<W>) -> Self {
        self.children.push(child);
        self
    }

    pub fn task(self, task: TaskSpec<W>) -> Self {
        self.child(ChildSpec::task(task))
    }

    pub fn composite(self, composite: CompositeSpec<W>) -> Self {
        self.child(ChildSpec::composite(composite))
    }
}

enum ChildSpecNode<W>
where
    W: WorldMut + 'static,
{
    Task(TaskSpec<W>),
    Composite(CompositeSpec<W>),
}

/// One child entry: a task or a composite plus its decorators.
pub struct ChildSpec<W>
where
    W: WorldMut + 'static,
{
    node: ChildSpecNode<W>,
    decorators: Vec<DecoratorSpec<W>>,
    logic: Vec<LogicOp>,
}

impl<W> ChildSpec<W>
where
    W: WorldMut + 'static,
{
    pub fn task(task: TaskSpec<W>) -> Self {
        Self {
            node: ChildSpecNode::Task(task),
            decorators: Vec::new(),
            logic: Vec::new(),
        }
    }

    pub fn composite(composite: CompositeSpec<W>) -> Self {
        Self {
            node: ChildSpecNode::Composite(composite),
            decorators: Vec::new(),
            logic: Vec::new(),
        }
    }

    pub fn decorator(mut self, decorator: DecoratorSpec<W>) -> Self {
        self.decorators.push(decorator);
        self
    }

    /// Combine the decorators with an expression instead of a plain AND.
    pub fn logic(mut self, ops: impl IntoIterator<Item = LogicOp>) -> Self {
        self.logic = ops.into_iter().collect();
        self
    }
}

enum TaskTemplate<W>
where
    W: WorldMut + 'static,
{
    Factory(TaskFactory<W>),
    Subtree(Rc<BehaviorTree<W>>),
}

pub struct TaskSpec<W>
where
    W: WorldMut + 'static,
{
    name: String,
    template: TaskTemplate<W>,
    services: Vec<ServiceSpec<W>>,
    ignore_restart_self: bool,
}

impl<W> TaskSpec<W>
where
    W: WorldMut + 'static,
{
    /// `factory` runs once per pushed instance.
    pub fn new<T, F>(name: impl Into<String>, factory: F) -> Self
    where
        T: Task<W>,
        F: Fn() -> T + 'static,
    {
        Self {
            name: name.into(),
            template: TaskTemplate::Factory(Rc::new(move || Box::new(factory()) as Box<dyn Task<W>>)),
            services: Vec::new(),
            ignore_restart_self: false,
        }
    }

    /// Task that pushes `tree` as a nested instance and finishes with its result.
    pub fn subtree(name: impl Into<String>, tree: Rc<BehaviorTree<W>>) -> Self {
        Self {
            name: name.into(),
            template: TaskTemplate::Subtree(tree),
            services: Vec::new(),
            ignore_restart_self: false,
        }
    }

    pub fn service(mut self, service: ServiceSpec<W>) -> Self {
        self.services.push(service);
        self
    }

    pub fn ignore_restart_self(mut self, ignore: bool) -> Self {
        self.ignore_restart_self = ignore;
        self
    }
}

pub struct DecoratorSpec<W>
where
    W: WorldMut + 'static,
{
    name: String,
    factory: DecoratorFactory<W>,
    def: DecoratorDef,
}

impl<W> DecoratorSpec<W>
where
    W: WorldMut + 'static,
{
    pub fn new<D, F>(name: impl Into<String>, factory: F) -> Self
    where
        D: Decorator<W>,
        F: Fn() -> D + 'static,
    {
        Self {
            name: name.into(),
            factory: Rc::new(move || Box::new(factory()) as Box<dyn Decorator<W>>),
            def: DecoratorDef::default(),
        }
    }

    pub fn inverse(mut self) -> Self {
        self.def.inverse = true;
        self
    }

    pub fn abort_mode(mut self, mode: AbortMode) -> Self {
        self.def.abort_mode = mode;
        self
    }

    /// Re-evaluate this decorator whenever `key` changes while it observes.
    pub fn observes(mut self, key: KeyId) -> Self {
        if !self.def.observed_keys.contains(&key) {
            self.def.observed_keys.push(key);
        }
        self
    }
}

pub struct ServiceSpec<W>
where
    W: WorldMut + 'static,
{
    name: String,
    factory: ServiceFactory<W>,
    def: ServiceDef,
}

impl<W> ServiceSpec<W>
where
    W: WorldMut + 'static,
{
    pub fn new<S, F>(name: impl Into<String>, interval_seconds: f32, factory: F) -> Self
    where
        S: Service<W>,
        F: Fn() -> S + 'static,
    {
        Self {
            name: name.into(),
            factory: Rc::new(move || Box::new(factory()) as Box<dyn Service<W>>),
            def: ServiceDef {
                interval: interval_seconds,
                random_deviation: 0.0,
                call_tick_on_search_start: false,
            },
        }
    }

    pub fn random_deviation(mut self, seconds: f32) -> Self {
        self.def.random_deviation = seconds;
        self
    }

    pub fn tick_on_search_start(mut self) -> Self {
        self.def.call_tick_on_search_start = true;
        self
    }
}

struct Flattener<'a, W>
where
    W: WorldMut + 'static,
{
    tree: &'a str,
    nodes: Vec<NodeDef>,
    templates: Vec<NodeTemplate<W>>,
}

impl<W> Flattener<'_, W>
where
    W: WorldMut + 'static,
{
    fn alloc(
        &mut self,
        name: String,
        parent: Option<u16>,
        child_slot: Option<usize>,
        depth: u16,
        kind: NodeKind,
        template: NodeTemplate<W>,
    ) -> Result<u16, BuildError> {
        if self.nodes.len() >= MAX_TREE_NODES {
            return Err(BuildError::IndexOverflow {
                tree: self.tree.to_string(),
                max: MAX_TREE_NODES,
            });
        }
        let execution_index = self.nodes.len() as u16;
        self.nodes.push(NodeDef {
            execution_index,
            name,
            parent,
            child_slot,
            depth,
            kind,
        });
        self.templates.push(template);
        Ok(execution_index)
    }

    fn composite(
        &mut self,
        spec: CompositeSpec<W>,
        parent: Option<u16>,
        child_slot: Option<usize>,
        depth: u16,
    ) -> Result<u16, BuildError> {
        if spec.children.is_empty() {
            return Err(BuildError::EmptyComposite(spec.name));
        }

        // Kind is filled in once the subtree range is known.
        let placeholder = NodeKind::Task(TaskDef::default());
        let index = self.alloc(
            spec.name,
            parent,
            child_slot,
            depth,
            placeholder,
            NodeTemplate::Composite,
        )?;

        let mut services = Vec::with_capacity(spec.services.len());
        for service in spec.services {
            services.push(self.service(service, index, None, depth + 1)?);
        }

        let mut children = Vec::with_capacity(spec.children.len());
        for (slot, child) in spec.children.into_iter().enumerate() {
            children.push(self.child(child, index, slot, depth + 1)?);
        }

        let last_execution_index = (self.nodes.len() - 1) as u16;
        self.nodes[index as usize].kind = NodeKind::Composite(CompositeDef {
            policy: spec.policy,
            children,
            services,
            last_execution_index,
        });
        Ok(index)
    }

    fn child(
        &mut self,
        spec: ChildSpec<W>,
        parent: u16,
        slot: usize,
        depth: u16,
    ) -> Result<ChildEntry, BuildError> {
        let first_index = self.nodes.len() as u16;

        let child_name = match &spec.node {
            ChildSpecNode::Task(task) => task.name.clone(),
            ChildSpecNode::Composite(composite) => composite.name.clone(),
        };
        logic::validate(&spec.logic, spec.decorators.len()).map_err(|defect| match defect {
            LogicDefect::SlotOutOfRange(bad) => BuildError::InvalidDecoratorSlot {
                node: child_name.clone(),
                slot: bad,
                count: spec.decorators.len(),
            },
            other => BuildError::MalformedLogic {
                node: child_name.clone(),
                reason: other.reason(),
            },
        })?;

        let mut decorators = Vec::with_capacity(spec.decorators.len());
        for decorator in spec.decorators {
            decorators.push(self.alloc(
                decorator.name,
                Some(parent),
                Some(slot),
                depth,
                NodeKind::Decorator(decorator.def),
                NodeTemplate::Decorator(decorator.factory),
            )?);
        }

        let (node, services) = match spec.node {
            ChildSpecNode::Composite(composite) => {
                let index = self.composite(composite, Some(parent), Some(slot), depth)?;
                (ChildNode::Composite(index), Vec::new())
            }
            ChildSpecNode::Task(task) => {
                let mut services = Vec::with_capacity(task.services.len());
                for service in task.services {
                    services.push(self.service(service, parent, Some(slot), depth)?);
                }
                let (runs_subtree, template) = match task.template {
                    TaskTemplate::Factory(factory) => (false, NodeTemplate::Task(factory)),
                    TaskTemplate::Subtree(tree) => (true, NodeTemplate::Subtree(tree)),
                };
                let def = TaskDef {
                    ignore_restart_self: task.ignore_restart_self,
                    runs_subtree,
                };
                let index = self.alloc(
                    task.name,
                    Some(parent),
                    Some(slot),
                    depth,
                    NodeKind::Task(def),
                    template,
                )?;
                (ChildNode::Task(index), services)
            }
        };

        Ok(ChildEntry {
            node,
            decorators,
            decorator_ops: spec.logic,
            services,
            first_index,
        })
    }

    fn service(
        &mut self,
        spec: ServiceSpec<W>,
        parent: u16,
        child_slot: Option<usize>,
        depth: u16,
    ) -> Result<u16, BuildError> {
        let ServiceDef {
            interval,
            random_deviation,
            ..
        } = spec.def;
        let valid = interval.is_finite()
            && interval > 0.0
            && random_deviation.is_finite()
            && random_deviation >= 0.0;
        if !valid {
            return Err(BuildError::InvalidServiceInterval {
                name: spec.name,
                interval,
                deviation: random_deviation,
            });
        }
        self.alloc(
            spec.name,
            Some(parent),
            child_slot,
            depth,
            NodeKind::Service(spec.def),
            NodeTemplate::Service(spec.factory),
        )
    }
}
