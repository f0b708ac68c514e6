//! Stock tasks, decorators and services.

use bt_core::{KeyId, Value, WorldMut};

use crate::behavior::{Decorator, DecoratorContext, DecoratorSignal, NodeContext, Service, Task};
use crate::NodeResult;

/// Succeeds once `seconds` of tick time have passed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wait {
    seconds: f32,
    elapsed: f32,
}

impl Wait {
    pub fn new(seconds: f32) -> Self {
        Self {
            seconds,
            elapsed: 0.0,
        }
    }
}

impl<W> Task<W> for Wait
where
    W: WorldMut + 'static,
{
    fn execute(&mut self, _ctx: &mut NodeContext<'_, W>) -> NodeResult {
        self.elapsed = 0.0;
        if self.seconds <= 0.0 {
            NodeResult::Succeeded
        } else {
            NodeResult::InProgress
        }
    }

    fn tick(&mut self, _ctx: &mut NodeContext<'_, W>, dt_seconds: f32) -> NodeResult {
        self.elapsed += dt_seconds;
        if self.elapsed >= self.seconds {
            NodeResult::Succeeded
        } else {
            NodeResult::InProgress
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Succeed;

impl<W> Task<W> for Succeed
where
    W: WorldMut + 'static,
{
    fn execute(&mut self, _ctx: &mut NodeContext<'_, W>) -> NodeResult {
        NodeResult::Succeeded
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fail;

impl<W> Task<W> for Fail
where
    W: WorldMut + 'static,
{
    fn execute(&mut self, _ctx: &mut NodeContext<'_, W>) -> NodeResult {
        NodeResult::Failed
    }
}

/// Task whose `execute` is a closure. Finished results end it immediately,
/// `InProgress` keeps it running until it is finished from outside.
pub struct FnTask<F>(pub F);

impl<W, F> Task<W> for FnTask<F>
where
    W: WorldMut + 'static,
    F: FnMut(&mut NodeContext<'_, W>) -> NodeResult + 'static,
{
    fn execute(&mut self, ctx: &mut NodeContext<'_, W>) -> NodeResult {
        (self.0)(ctx)
    }
}

/// Writes a fixed value to the blackboard and succeeds; fails on a type
/// mismatch.
#[derive(Debug, Clone, PartialEq)]
pub struct SetBlackboard {
    key: KeyId,
    value: Value,
}

impl SetBlackboard {
    pub fn new(key: KeyId, value: Value) -> Self {
        Self { key, value }
    }
}

impl<W> Task<W> for SetBlackboard
where
    W: WorldMut + 'static,
{
    fn execute(&mut self, ctx: &mut NodeContext<'_, W>) -> NodeResult {
        match ctx.blackboard.set_value(self.key, self.value.clone()) {
            Ok(_) => NodeResult::Succeeded,
            Err(err) => {
                tracing::warn!(node = %ctx.node, error = %err, "blackboard write failed");
                NodeResult::Failed
            }
        }
    }
}

/// Passes when a key is set, or when it holds an exact value.
///
/// Pair it with [`crate::DecoratorSpec::observes`] on the same key so value
/// changes trigger aborts.
#[derive(Debug, Clone, PartialEq)]
pub struct BlackboardCondition {
    key: KeyId,
    expected: Option<Value>,
}

impl BlackboardCondition {
    pub fn is_set(key: KeyId) -> Self {
        Self {
            key,
            expected: None,
        }
    }

    pub fn equals(key: KeyId, value: Value) -> Self {
        Self {
            key,
            expected: Some(value),
        }
    }
}

impl<W> Decorator<W> for BlackboardCondition
where
    W: WorldMut + 'static,
{
    fn check(&self, ctx: &DecoratorContext<'_, W>) -> bool {
        match (ctx.blackboard.value(self.key), &self.expected) {
            (Ok(value), Some(expected)) => value == expected,
            (Ok(value), None) => value.is_set(),
            (Err(_), _) => false,
        }
    }
}

/// Blocks its branch for `seconds` after the branch finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cooldown {
    seconds: f64,
    ready_at: Option<f64>,
    waiting: bool,
}

impl Cooldown {
    pub fn new(seconds: f32) -> Self {
        Self {
            seconds: f64::from(seconds),
            ready_at: None,
            waiting: false,
        }
    }
}

impl<W> Decorator<W> for Cooldown
where
    W: WorldMut + 'static,
{
    fn check(&self, ctx: &DecoratorContext<'_, W>) -> bool {
        self.ready_at
            .map(|ready_at| ctx.time_seconds >= ready_at)
            .unwrap_or(true)
    }

    fn tick(&mut self, ctx: &mut NodeContext<'_, W>, _dt_seconds: f32) -> DecoratorSignal {
        match self.ready_at {
            Some(ready_at) if self.waiting && ctx.time_seconds >= ready_at => {
                self.waiting = false;
                DecoratorSignal::Reevaluate
            }
            _ => DecoratorSignal::Unchanged,
        }
    }

    fn on_node_processed(&mut self, ctx: &mut NodeContext<'_, W>, _result: &mut NodeResult) {
        // Blocked activations are reported too; they must not extend the wait.
        let cooling = self
            .ready_at
            .map(|ready_at| ctx.time_seconds < ready_at)
            .unwrap_or(false);
        if !cooling {
            self.ready_at = Some(ctx.time_seconds + self.seconds);
            self.waiting = true;
        }
    }
}

/// Turns a failed branch into a success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForceSuccess;

impl<W> Decorator<W> for ForceSuccess
where
    W: WorldMut + 'static,
{
    fn check(&self, _ctx: &DecoratorContext<'_, W>) -> bool {
        true
    }

    fn on_node_processed(&mut self, _ctx: &mut NodeContext<'_, W>, result: &mut NodeResult) {
        if *result == NodeResult::Failed {
            *result = NodeResult::Succeeded;
        }
    }
}

pub struct FnDecorator<F>(pub F);

impl<W, F> Decorator<W> for FnDecorator<F>
where
    W: WorldMut + 'static,
    F: Fn(&DecoratorContext<'_, W>) -> bool + 'static,
{
    fn check(&self, ctx: &DecoratorContext<'_, W>) -> bool {
        (self.0)(ctx)
    }
}

/// Service whose tick is a closure receiving the time since its last tick.
pub struct FnService<F>(pub F);

impl<W, F> Service<W> for FnService<F>
where
    W: WorldMut + 'static,
    F: FnMut(&mut NodeContext<'_, W>, f32) + 'static,
{
    fn tick(&mut self, ctx: &mut NodeContext<'_, W>, elapsed_seconds: f32) {
        (self.0)(ctx, elapsed_seconds)
    }
}
