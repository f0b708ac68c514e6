//! Demo trees driven by a scripted world.

use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};
use bt_core::{BbKey, Blackboard, BlackboardDef, ValueType, WorldMut, WorldView};
use bt_engine::nodes::{BlackboardCondition, Cooldown, FnService, FnTask, Wait};
use bt_engine::{
    AbortMode, BehaviorTree, ChildSpec, CompositeSpec, DecoratorSpec, NodeContext, NodeResult,
    RunMode, ServiceSpec, Task, TaskSpec, TreeBuilder,
};
use clap::ValueEnum;

/// Scripted surroundings of the simulated agent.
#[derive(Debug, Default)]
pub struct SimWorld {
    /// `[start, end)` windows in seconds during which a threat is visible.
    pub threats: Vec<(f64, f64)>,
    /// What the agent did, in order.
    pub events: Vec<String>,
}

impl SimWorld {
    pub fn threat_visible(&self, time_seconds: f64) -> bool {
        self.threats
            .iter()
            .any(|&(start, end)| time_seconds >= start && time_seconds < end)
    }

    fn record(&mut self, tick: u64, what: impl Into<String>) {
        let what = what.into();
        tracing::debug!(tick, event = %what, "world event");
        self.events.push(format!("[{tick:>4}] {what}"));
    }
}

impl WorldView for SimWorld {
    type Agent = u64;
}

impl WorldMut for SimWorld {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Patrol until perception raises the alert, then engage.
    Guard,
    /// Run an errand in a nested tree, then report back.
    Errand,
    /// Bark whenever the cooldown allows, rest otherwise.
    Cooldown,
}

/// Everything needed to drive one scenario.
pub struct Setup {
    pub tree: Rc<BehaviorTree<SimWorld>>,
    pub blackboard: Blackboard,
    pub world: SimWorld,
    pub run_mode: RunMode,
}

impl Scenario {
    pub fn summary(self) -> &'static str {
        match self {
            Scenario::Guard => "patrol with a perception service and an abort-both alert gate",
            Scenario::Errand => "single run through a pushed subtree instance",
            Scenario::Cooldown => "cooldown decorator preempting a lower priority rest",
        }
    }

    pub fn build(self) -> Result<Setup> {
        match self {
            Scenario::Guard => guard(),
            Scenario::Errand => errand(),
            Scenario::Cooldown => cooldown(),
        }
    }
}

/// Records a line in the world and succeeds.
struct Announce(&'static str);

impl Task<SimWorld> for Announce {
    fn execute(&mut self, ctx: &mut NodeContext<'_, SimWorld>) -> NodeResult {
        let tick = ctx.tick.tick;
        ctx.world.record(tick, self.0);
        NodeResult::Succeeded
    }
}

fn guard() -> Result<Setup> {
    let def = BlackboardDef::builder("guard")
        .key("alert", ValueType::Bool)
        .key("waypoint", ValueType::Int)
        .build()
        .context("Failed to build guard blackboard")?;
    let alert: BbKey<bool> = def.key("alert")?;
    let waypoint: BbKey<i32> = def.key("waypoint")?;

    let perception = ServiceSpec::new("perception", 0.5, move || {
        FnService(move |ctx: &mut NodeContext<'_, SimWorld>, _elapsed: f32| {
            let visible = ctx.world.threat_visible(ctx.time_seconds);
            if let Ok(true) = ctx.blackboard.set(alert, visible) {
                let tick = ctx.tick.tick;
                let what = if visible { "threat spotted" } else { "threat lost" };
                ctx.world.record(tick, what);
            }
        })
    })
    .random_deviation(0.1);

    let next_waypoint = move || {
        FnTask(move |ctx: &mut NodeContext<'_, SimWorld>| {
            let current = ctx.blackboard.get(waypoint).unwrap_or(0);
            let next = (current + 1) % 4;
            if ctx.blackboard.set(waypoint, next).is_err() {
                return NodeResult::Failed;
            }
            let tick = ctx.tick.tick;
            ctx.world.record(tick, format!("heading to waypoint {next}"));
            NodeResult::Succeeded
        })
    };

    let engage = CompositeSpec::<SimWorld>::sequence("engage")
        .task(TaskSpec::new("aim", || Wait::new(0.5)))
        .task(TaskSpec::new("fire", || Announce("fire")));
    let patrol = CompositeSpec::<SimWorld>::sequence("patrol")
        .task(TaskSpec::new("next_waypoint", next_waypoint))
        .task(TaskSpec::new("walk", || Wait::new(1.0)));

    let key = alert.id();
    let root = CompositeSpec::<SimWorld>::selector("root")
        .service(perception)
        .child(
            ChildSpec::composite(engage).decorator(
                DecoratorSpec::new("alerted", move || BlackboardCondition::is_set(key))
                    .abort_mode(AbortMode::Both)
                    .observes(key),
            ),
        )
        .composite(patrol);
    let tree = TreeBuilder::new("guard")
        .blackboard(def.clone())
        .build(root)
        .context("Failed to build guard tree")?;

    Ok(Setup {
        tree,
        blackboard: Blackboard::new(def),
        world: SimWorld {
            threats: vec![(1.5, 3.0), (5.0, 5.6)],
            events: Vec::new(),
        },
        run_mode: RunMode::Looped,
    })
}

fn errand() -> Result<Setup> {
    let def: Arc<BlackboardDef> = BlackboardDef::empty("errand");
    let inner = TreeBuilder::new("errand_run")
        .blackboard(def.clone())
        .build(
            CompositeSpec::<SimWorld>::sequence("errand_root")
                .task(TaskSpec::new("travel", || Wait::new(0.3)))
                .task(TaskSpec::new("deliver", || Announce("package delivered"))),
        )
        .context("Failed to build errand subtree")?;
    let tree = TreeBuilder::new("errand")
        .blackboard(def.clone())
        .build(
            CompositeSpec::<SimWorld>::sequence("root")
                .task(TaskSpec::new("leave", || Announce("leaving base")))
                .task(TaskSpec::subtree("run_errand", inner))
                .task(TaskSpec::new("report", || Announce("reported back"))),
        )
        .context("Failed to build errand tree")?;

    Ok(Setup {
        tree,
        blackboard: Blackboard::new(def),
        world: SimWorld::default(),
        run_mode: RunMode::SingleRun,
    })
}

fn cooldown() -> Result<Setup> {
    let tree = TreeBuilder::new("cooldown")
        .build(
            CompositeSpec::<SimWorld>::selector("root")
                .child(
                    ChildSpec::task(TaskSpec::new("bark", || Announce("woof"))).decorator(
                        DecoratorSpec::new("cooldown", || Cooldown::new(1.0))
                            .abort_mode(AbortMode::LowerPriority),
                    ),
                )
                .task(TaskSpec::new("rest", || Wait::new(5.0))),
        )
        .context("Failed to build cooldown tree")?;

    Ok(Setup {
        tree,
        blackboard: Blackboard::empty(),
        world: SimWorld::default(),
        run_mode: RunMode::Looped,
    })
}
