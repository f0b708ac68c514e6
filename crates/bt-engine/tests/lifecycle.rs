use std::cell::Cell;
use std::rc::Rc;

use bt_core::{Blackboard, BlackboardDef, NodeIndex, TickContext, ValueType, WorldMut, WorldView};
use bt_engine::nodes::{FnDecorator, FnService, FnTask, Succeed, Wait};
use bt_engine::{
    BehaviorTree, ChildSpec, CompositeSpec, DecoratorContext, DecoratorSpec, NodeContext,
    NodeResult, RestartMode, RunMode, RuntimeConfig, ServiceSpec, Task, TaskSpec, TreeBuilder,
    TreeComponent, TreeError,
};
use bt_tools::SharedTraceSink;

const DT: f32 = 0.25;

struct RecordingWorld {
    service_ticks: Vec<(u64, f32)>,
}

impl WorldView for RecordingWorld {
    type Agent = u64;
}

impl WorldMut for RecordingWorld {}

fn world() -> RecordingWorld {
    RecordingWorld {
        service_ticks: Vec::new(),
    }
}

fn component(tree: Rc<BehaviorTree<RecordingWorld>>, mode: RunMode) -> TreeComponent<RecordingWorld> {
    let config = RuntimeConfig {
        trace: true,
        default_run_mode: mode,
        ..Default::default()
    };
    let mut component = TreeComponent::new(3, tree, Blackboard::empty()).with_config(config);
    component.start_logic().unwrap();
    component
}

fn run(
    component: &mut TreeComponent<RecordingWorld>,
    world: &mut RecordingWorld,
    ctx: &mut TickContext,
    ticks: usize,
) {
    for _ in 0..ticks {
        *ctx = ctx.advance(DT);
        component.tick(ctx, world);
    }
}

fn count(component: &TreeComponent<RecordingWorld>, tag: &str) -> usize {
    component.trace_log().map(|log| log.count(tag)).unwrap_or(0)
}

fn recording_service(name: &str, interval: f32) -> ServiceSpec<RecordingWorld> {
    ServiceSpec::new(name, interval, || {
        FnService(|ctx: &mut NodeContext<'_, RecordingWorld>, elapsed: f32| {
            let tick = ctx.tick.tick;
            ctx.world.service_ticks.push((tick, elapsed));
        })
    })
}

/// Never finishes, and only stops when told to.
struct Stubborn {
    finished: Rc<Cell<Option<NodeResult>>>,
}

impl Task<RecordingWorld> for Stubborn {
    fn execute(&mut self, _ctx: &mut NodeContext<'_, RecordingWorld>) -> NodeResult {
        NodeResult::InProgress
    }

    fn abort(&mut self, _ctx: &mut NodeContext<'_, RecordingWorld>) -> NodeResult {
        NodeResult::InProgress
    }

    fn on_finished(&mut self, _ctx: &mut NodeContext<'_, RecordingWorld>, result: NodeResult) {
        self.finished.set(Some(result));
    }
}

#[test]
fn root_service_first_tick_waits_one_interval() {
    let tree = TreeBuilder::new("svc")
        .build(
            CompositeSpec::selector("root")
                .service(recording_service("scan", 1.0))
                .task(TaskSpec::new("idle", || Wait::new(100.0))),
        )
        .unwrap();
    let mut c = component(tree, RunMode::Looped);
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);

    run(&mut c, &mut w, &mut ctx, 3);
    assert!(w.service_ticks.is_empty());
    assert!(c.is_aux_active(NodeIndex::new(0, 1)));

    run(&mut c, &mut w, &mut ctx, 9);
    let ticks: Vec<u64> = w.service_ticks.iter().map(|(t, _)| *t).collect();
    assert_eq!(ticks, vec![4, 8, 12]);
    assert_eq!(w.service_ticks[1].1, 1.0);
}

#[test]
fn task_service_ticks_when_task_starts() {
    let tree = TreeBuilder::new("svc")
        .build(
            CompositeSpec::selector("root").task(
                TaskSpec::new("idle", || Wait::new(100.0)).service(recording_service("watch", 1.0)),
            ),
        )
        .unwrap();
    let mut c = component(tree, RunMode::Looped);
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);

    run(&mut c, &mut w, &mut ctx, 5);
    let ticks: Vec<u64> = w.service_ticks.iter().map(|(t, _)| *t).collect();
    assert_eq!(ticks, vec![1, 5]);
}

#[test]
fn service_of_a_branch_left_in_the_same_search_never_activates() {
    // root 0, guarded 1, scan 2, closed 3, blocked 4, fallback 5
    let closed = || FnDecorator(|_ctx: &DecoratorContext<'_, RecordingWorld>| false);
    let tree = TreeBuilder::new("svc")
        .build(
            CompositeSpec::selector("root")
                .composite(
                    CompositeSpec::sequence("guarded")
                        .service(recording_service("scan", 0.5))
                        .child(
                            ChildSpec::task(TaskSpec::new("blocked", || Wait::new(1.0)))
                                .decorator(DecoratorSpec::new("closed", closed)),
                        ),
                )
                .task(TaskSpec::new("fallback", || Wait::new(100.0))),
        )
        .unwrap();
    let mut c = component(tree, RunMode::Looped);
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);

    run(&mut c, &mut w, &mut ctx, 4);
    assert_eq!(c.active_task(), Some(NodeIndex::new(0, 5)));
    assert!(!c.is_aux_active(NodeIndex::new(0, 2)));

    let log = c.trace_log().unwrap();
    let touched_scan = log
        .events
        .iter()
        .filter(|e| &*e.tag == "bt.aux.add" || &*e.tag == "bt.aux.remove")
        .any(|e| e.a == 0 && e.b == 2);
    assert!(!touched_scan);
    assert!(w.service_ticks.is_empty());
}

#[test]
fn task_service_is_removed_with_its_task() {
    let tree = TreeBuilder::new("svc")
        .build(
            CompositeSpec::sequence("root")
                .task(TaskSpec::new("short", || Wait::new(0.5)).service(recording_service("watch", 1.0)))
                .task(TaskSpec::new("idle", || Wait::new(100.0))),
        )
        .unwrap();
    let mut c = component(tree, RunMode::Looped);
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);

    run(&mut c, &mut w, &mut ctx, 1);
    assert!(c.is_aux_active(NodeIndex::new(0, 1)));
    run(&mut c, &mut w, &mut ctx, 1);
    assert_eq!(c.active_task_name(), Some("idle"));
    assert!(!c.is_aux_active(NodeIndex::new(0, 1)));
    assert_eq!(count(&c, "bt.aux.remove"), 1);
}

#[test]
fn service_deviation_is_deterministic_per_seed() {
    let build = || {
        TreeBuilder::new("svc")
            .build(
                CompositeSpec::selector("root")
                    .service(recording_service("scan", 1.0).random_deviation(0.5))
                    .task(TaskSpec::new("idle", || Wait::new(100.0))),
            )
            .unwrap()
    };
    let sample = || {
        let mut c = component(build(), RunMode::Looped);
        let mut w = world();
        let mut ctx = TickContext::new(0, DT, 0);
        run(&mut c, &mut w, &mut ctx, 40);
        w.service_ticks
            .iter()
            .map(|(t, _)| *t)
            .collect::<Vec<u64>>()
    };
    let first = sample();
    assert!(!first.is_empty());
    assert_eq!(first, sample());
}

#[test]
fn latent_task_finishes_on_next_tick() {
    let tree = TreeBuilder::new("latent")
        .build(
            CompositeSpec::sequence("root")
                .task(TaskSpec::new("remote", || {
                    FnTask(|_ctx: &mut NodeContext<'_, RecordingWorld>| NodeResult::InProgress)
                }))
                .task(TaskSpec::new("after", || Succeed)),
        )
        .unwrap();
    let mut c = component(tree, RunMode::SingleRun);
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);

    assert_eq!(
        c.finish_latent_task(NodeIndex::new(0, 1), NodeResult::Succeeded),
        Err(TreeError::NotRunning)
    );

    run(&mut c, &mut w, &mut ctx, 3);
    assert_eq!(c.active_task_name(), Some("remote"));

    c.finish_latent_task(NodeIndex::new(0, 1), NodeResult::Succeeded)
        .unwrap();
    assert!(c.is_running());
    run(&mut c, &mut w, &mut ctx, 1);
    assert!(!c.is_running());
    assert_eq!(c.last_tree_result(), Some(NodeResult::Succeeded));
}

#[test]
fn unknown_nodes_are_rejected() {
    let tree = TreeBuilder::new("t")
        .build(CompositeSpec::selector("root").task(TaskSpec::new("idle", || Wait::new(100.0))))
        .unwrap();
    let mut c = component(tree, RunMode::Looped);
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);
    run(&mut c, &mut w, &mut ctx, 1);

    let missing = NodeIndex::new(0, 9);
    assert_eq!(
        c.finish_latent_abort(missing),
        Err(TreeError::UnknownNode(missing))
    );
    assert_eq!(
        c.request_branch(NodeIndex::ROOT, 4),
        Err(TreeError::UnknownNode(NodeIndex::ROOT))
    );
}

#[test]
fn latent_abort_delays_next_task() {
    let finished = Rc::new(Cell::new(None));
    let hook = finished.clone();
    let tree = TreeBuilder::new("abort")
        .build(
            CompositeSpec::selector("root")
                .task(TaskSpec::new("stubborn", move || Stubborn {
                    finished: hook.clone(),
                }))
                .task(TaskSpec::new("idle", || Wait::new(100.0))),
        )
        .unwrap();
    let mut c = component(tree, RunMode::Looped);
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);

    run(&mut c, &mut w, &mut ctx, 1);
    c.request_branch(NodeIndex::ROOT, 1).unwrap();
    run(&mut c, &mut w, &mut ctx, 2);
    assert_eq!(c.active_task_name(), Some("stubborn"));
    assert_eq!(count(&c, "bt.task.execute"), 1);
    assert_eq!(finished.get(), None);

    c.finish_latent_abort(NodeIndex::new(0, 1)).unwrap();
    run(&mut c, &mut w, &mut ctx, 1);
    assert_eq!(finished.get(), Some(NodeResult::Aborted));
    assert_eq!(c.active_task_name(), Some("idle"));
}

#[test]
fn stop_forces_latent_abort() {
    let finished = Rc::new(Cell::new(None));
    let hook = finished.clone();
    let tree = TreeBuilder::new("stop")
        .build(CompositeSpec::selector("root").task(TaskSpec::new("stubborn", move || Stubborn {
            finished: hook.clone(),
        })))
        .unwrap();
    let mut c = component(tree, RunMode::Looped);
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);

    run(&mut c, &mut w, &mut ctx, 2);
    c.stop_logic(&ctx, &mut w);
    assert!(!c.is_running());
    assert_eq!(finished.get(), Some(NodeResult::Aborted));
    assert_eq!(c.instance_count(), 0);
    assert_eq!(count(&c, "bt.tree.stopped"), 1);
}

#[test]
fn paused_tree_keeps_its_state() {
    let tree = TreeBuilder::new("pause")
        .build(CompositeSpec::sequence("root").task(TaskSpec::new("nap", || Wait::new(0.5))))
        .unwrap();
    let mut c = component(tree, RunMode::SingleRun);
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);

    run(&mut c, &mut w, &mut ctx, 1);
    c.pause_logic();
    assert!(c.is_paused());
    run(&mut c, &mut w, &mut ctx, 5);
    assert!(c.is_running());
    assert_eq!(c.active_task_name(), Some("nap"));

    c.resume_logic();
    run(&mut c, &mut w, &mut ctx, 1);
    assert!(!c.is_running());
    assert_eq!(c.last_tree_result(), Some(NodeResult::Succeeded));
}

#[test]
fn reevaluate_keeps_task_that_ignores_self_restart() {
    let tree = TreeBuilder::new("restart")
        .build(
            CompositeSpec::selector("root")
                .task(TaskSpec::new("idle", || Wait::new(100.0)).ignore_restart_self(true)),
        )
        .unwrap();
    let mut c = component(tree, RunMode::Looped);
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);

    run(&mut c, &mut w, &mut ctx, 1);
    c.restart_logic(RestartMode::ForceReevaluateRootNode);
    run(&mut c, &mut w, &mut ctx, 1);
    assert_eq!(count(&c, "bt.task.execute"), 1);
    assert_eq!(count(&c, "bt.search.rollback"), 1);
    assert_eq!(c.active_task_name(), Some("idle"));
}

#[test]
fn reevaluate_restarts_ordinary_task() {
    let tree = TreeBuilder::new("restart")
        .build(CompositeSpec::selector("root").task(TaskSpec::new("idle", || Wait::new(100.0))))
        .unwrap();
    let mut c = component(tree, RunMode::Looped);
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);

    run(&mut c, &mut w, &mut ctx, 1);
    c.restart_logic(RestartMode::ForceReevaluateRootNode);
    run(&mut c, &mut w, &mut ctx, 1);
    assert_eq!(count(&c, "bt.task.execute"), 2);
    assert_eq!(count(&c, "bt.task.abort"), 1);
}

#[test]
fn complete_restart_stops_and_starts() {
    let tree = TreeBuilder::new("restart")
        .build(CompositeSpec::selector("root").task(TaskSpec::new("idle", || Wait::new(100.0))))
        .unwrap();
    let mut c = component(tree, RunMode::Looped);
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);

    run(&mut c, &mut w, &mut ctx, 1);
    c.restart_logic(RestartMode::CompleteRestart);
    run(&mut c, &mut w, &mut ctx, 1);

    let log = c.trace_log().unwrap();
    let lifecycle: Vec<&str> = log
        .events
        .iter()
        .filter(|e| e.tag.starts_with("bt.tree."))
        .map(|e| &*e.tag)
        .collect();
    assert_eq!(lifecycle, vec!["bt.tree.started", "bt.tree.stopped", "bt.tree.started"]);
    assert_eq!(count(&c, "bt.task.execute"), 2);
    assert!(c.is_running());
}

#[test]
fn incompatible_root_blackboard_refuses_to_start() {
    let def = BlackboardDef::builder("main")
        .key("flag", ValueType::Bool)
        .build()
        .unwrap();
    let other = BlackboardDef::builder("other")
        .key("speed", ValueType::Float)
        .build()
        .unwrap();
    let tree = TreeBuilder::new("t")
        .blackboard(def)
        .build(CompositeSpec::selector("root").task(TaskSpec::new("idle", || Wait::new(100.0))))
        .unwrap();
    let mut c: TreeComponent<RecordingWorld> = TreeComponent::new(1, tree, Blackboard::new(other));
    assert!(matches!(
        c.start_logic(),
        Err(TreeError::IncompatibleBlackboard { .. })
    ));
    assert!(!c.is_running());
}

#[test]
fn trace_sink_receives_events() {
    let sink = SharedTraceSink::new();
    let tree = TreeBuilder::new("sink")
        .build(CompositeSpec::selector("root").task(TaskSpec::new("ok", || Succeed)))
        .unwrap();
    let mut c = TreeComponent::new(1, tree, Blackboard::empty())
        .with_config(RuntimeConfig {
            default_run_mode: RunMode::SingleRun,
            ..Default::default()
        })
        .with_trace_sink(Box::new(sink.clone()));
    c.start_logic().unwrap();
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);
    run(&mut c, &mut w, &mut ctx, 1);

    assert!(c.trace_log().is_none());
    let events = sink.take();
    assert_eq!(events.first().map(|e| &*e.tag), Some("bt.tree.started"));
    assert_eq!(events.last().map(|e| &*e.tag), Some("bt.tree.stopped"));
}

#[test]
fn diagnostics_describe_running_state() {
    let tree = TreeBuilder::new("diag")
        .build(
            CompositeSpec::selector("root")
                .service(recording_service("scan", 1.0))
                .task(TaskSpec::new("idle", || Wait::new(100.0))),
        )
        .unwrap();
    let mut c = component(tree, RunMode::Looped);
    let mut w = world();
    let mut ctx = TickContext::new(0, DT, 0);
    run(&mut c, &mut w, &mut ctx, 1);

    let diag = c.diagnostics();
    assert!(diag.running);
    assert!(!diag.paused);
    assert_eq!(diag.instance_count, 1);
    assert_eq!(diag.active_task, Some((NodeIndex::new(0, 2), "idle".to_string())));
    assert_eq!(diag.active_aux, vec![(NodeIndex::new(0, 1), "scan".to_string())]);
}
