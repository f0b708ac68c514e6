//! Extension points: the traits user nodes implement.
//!
//! Composites are built into the engine. Tasks, decorators and services are
//! user objects created per tree instance from the factories registered in
//! the [`crate::TreeBuilder`].

use bt_core::{Blackboard, NodeIndex, TickContext, WorldMut, WorldView};

use crate::NodeResult;

/// Mutable view handed to tasks, services and decorator hooks.
pub struct NodeContext<'a, W>
where
    W: WorldMut + 'static,
{
    pub tick: &'a TickContext,
    /// Seconds accumulated by the owning component since it was created.
    pub time_seconds: f64,
    pub agent: W::Agent,
    pub world: &'a mut W,
    pub blackboard: &'a mut Blackboard,
    /// Position of the node being called.
    pub node: NodeIndex,
}

/// Read-only view used for decorator condition checks.
pub struct DecoratorContext<'a, W>
where
    W: WorldView + 'static,
{
    pub tick: &'a TickContext,
    pub time_seconds: f64,
    pub agent: W::Agent,
    pub world: &'a W,
    pub blackboard: &'a Blackboard,
    pub node: NodeIndex,
}

/// Leaf action.
///
/// A task finishes synchronously by returning a finished result from
/// [`Task::execute`], or reports `InProgress` and finishes later, either by
/// returning a finished result from [`Task::tick`] or through
/// [`crate::TreeComponent::finish_latent_task`].
pub trait Task<W>: 'static
where
    W: WorldMut + 'static,
{
    fn execute(&mut self, ctx: &mut NodeContext<'_, W>) -> NodeResult;

    fn tick(&mut self, _ctx: &mut NodeContext<'_, W>, _dt_seconds: f32) -> NodeResult {
        NodeResult::InProgress
    }

    /// Asked to stop. `InProgress` makes the abort latent: the task keeps
    /// ticking until it returns a finished result or the owner calls
    /// [`crate::TreeComponent::finish_latent_abort`].
    fn abort(&mut self, _ctx: &mut NodeContext<'_, W>) -> NodeResult {
        NodeResult::Aborted
    }

    fn on_finished(&mut self, _ctx: &mut NodeContext<'_, W>, _result: NodeResult) {}
}

/// Returned from [`Decorator::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoratorSignal {
    Unchanged,
    /// Re-check the condition and abort according to the abort mode.
    Reevaluate,
}

/// Condition guarding one child entry of a composite.
pub trait Decorator<W>: 'static
where
    W: WorldMut + 'static,
{
    /// Raw condition, before the `inverse` flag is applied.
    fn check(&self, ctx: &DecoratorContext<'_, W>) -> bool;

    fn on_become_relevant(&mut self, _ctx: &mut NodeContext<'_, W>) {}

    fn on_cease_relevant(&mut self, _ctx: &mut NodeContext<'_, W>) {}

    /// Called every tick while the decorator is an active observer.
    fn tick(&mut self, _ctx: &mut NodeContext<'_, W>, _dt_seconds: f32) -> DecoratorSignal {
        DecoratorSignal::Unchanged
    }

    /// The guarded child finished; the decorator may rewrite its result.
    fn on_node_processed(&mut self, _ctx: &mut NodeContext<'_, W>, _result: &mut NodeResult) {}
}

/// Periodic monitor attached to a composite or a task.
pub trait Service<W>: 'static
where
    W: WorldMut + 'static,
{
    fn on_become_relevant(&mut self, _ctx: &mut NodeContext<'_, W>) {}

    fn on_cease_relevant(&mut self, _ctx: &mut NodeContext<'_, W>) {}

    /// The search entered the branch this service is attached to.
    fn on_search_start(&mut self, _ctx: &mut NodeContext<'_, W>) {}

    /// `elapsed_seconds` is the time since the previous tick of this service.
    fn tick(&mut self, ctx: &mut NodeContext<'_, W>, elapsed_seconds: f32);
}
