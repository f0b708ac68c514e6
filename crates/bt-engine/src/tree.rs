use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::Arc;

use bt_core::{BlackboardDef, WorldMut};

use crate::behavior::{Decorator, Service, Task};
use crate::builder::TreeBuilder;
use crate::node::{ChildNode, NodeKind, TreeLayout};

pub(crate) type TaskFactory<W> = Rc<dyn Fn() -> Box<dyn Task<W>>>;
pub(crate) type DecoratorFactory<W> = Rc<dyn Fn() -> Box<dyn Decorator<W>>>;
pub(crate) type ServiceFactory<W> = Rc<dyn Fn() -> Box<dyn Service<W>>>;

pub(crate) enum NodeTemplate<W>
where
    W: WorldMut + 'static,
{
    Composite,
    Task(TaskFactory<W>),
    Subtree(Rc<BehaviorTree<W>>),
    Decorator(DecoratorFactory<W>),
    Service(ServiceFactory<W>),
}

/// Immutable tree definition, shared by every instance running it.
pub struct BehaviorTree<W>
where
    W: WorldMut + 'static,
{
    name: String,
    layout: TreeLayout,
    templates: Vec<NodeTemplate<W>>,
    blackboard: Option<Arc<BlackboardDef>>,
}

impl<W> BehaviorTree<W>
where
    W: WorldMut + 'static,
{
    pub fn builder(name: impl Into<String>) -> TreeBuilder<W> {
        TreeBuilder::new(name)
    }

    pub(crate) fn from_parts(
        name: String,
        layout: TreeLayout,
        templates: Vec<NodeTemplate<W>>,
        blackboard: Option<Arc<BlackboardDef>>,
    ) -> Self {
        Self {
            name,
            layout,
            templates,
            blackboard,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &TreeLayout {
        &self.layout
    }

    pub fn blackboard(&self) -> Option<&Arc<BlackboardDef>> {
        self.blackboard.as_ref()
    }

    pub fn node_name(&self, index: u16) -> &str {
        self.layout
            .node(index)
            .map(|n| n.name.as_str())
            .unwrap_or("<unknown>")
    }

    pub(crate) fn template(&self, index: u16) -> Option<&NodeTemplate<W>> {
        self.templates.get(index as usize)
    }

    /// Indented listing of the node arena, one node per line.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} ({} nodes)", self.name, self.layout.len());
        self.describe_composite(self.layout.root(), 1, &mut out);
        out
    }

    fn describe_composite(&self, index: u16, depth: usize, out: &mut String) {
        let Some(composite) = self.layout.composite(index) else {
            return;
        };
        let pad = "  ".repeat(depth);
        let _ = writeln!(
            out,
            "{pad}[{index}] {:?} '{}' (last {})",
            composite.policy,
            self.node_name(index),
            composite.last_execution_index
        );
        for &service in &composite.services {
            let _ = writeln!(out, "{pad}  [{service}] service '{}'", self.node_name(service));
        }
        for entry in &composite.children {
            for &decorator in &entry.decorators {
                let mode = self
                    .layout
                    .decorator(decorator)
                    .map(|d| d.abort_mode)
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "{pad}  [{decorator}] decorator '{}' abort={mode:?}",
                    self.node_name(decorator)
                );
            }
            for &service in &entry.services {
                let _ = writeln!(out, "{pad}  [{service}] service '{}'", self.node_name(service));
            }
            match entry.node {
                ChildNode::Composite(child) => self.describe_composite(child, depth + 1, out),
                ChildNode::Task(task) => {
                    let kind = match self.layout.node(task).map(|n| &n.kind) {
                        Some(NodeKind::Task(def)) if def.runs_subtree => "subtree",
                        _ => "task",
                    };
                    let _ = writeln!(out, "{pad}  [{task}] {kind} '{}'", self.node_name(task));
                }
            }
        }
    }
}

impl<W> core::fmt::Debug for BehaviorTree<W>
where
    W: WorldMut + 'static,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BehaviorTree")
            .field("name", &self.name)
            .field("nodes", &self.layout.len())
            .field("blackboard", &self.blackboard.as_ref().map(|b| b.name()))
            .finish()
    }
}
