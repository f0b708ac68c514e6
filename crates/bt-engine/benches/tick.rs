use bt_core::{Blackboard, BlackboardDef, TickContext, ValueType, WorldMut, WorldView};
use bt_engine::nodes::{BlackboardCondition, Succeed, Wait};
use bt_engine::{
    AbortMode, ChildSpec, CompositeSpec, DecoratorSpec, RuntimeConfig, TaskSpec, TreeBuilder,
    TreeComponent,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

#[derive(Default)]
struct World;

impl WorldView for World {
    type Agent = u64;
}

impl WorldMut for World {}

fn bench_idle_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("bt-engine/tick");

    for &guards in &[8usize, 64usize] {
        let def = BlackboardDef::builder("bench")
            .key("alert", ValueType::Bool)
            .build()
            .unwrap();
        let alert = def.find_key("alert").unwrap();

        let mut root = CompositeSpec::<World>::selector("root");
        for i in 0..guards {
            root = root.child(
                ChildSpec::task(TaskSpec::new(format!("guarded{i}"), || Succeed)).decorator(
                    DecoratorSpec::new(format!("alert{i}"), move || BlackboardCondition::is_set(alert))
                        .abort_mode(AbortMode::LowerPriority)
                        .observes(alert),
                ),
            );
        }
        root = root.task(TaskSpec::new("idle", || Wait::new(1.0e9)));

        let tree = TreeBuilder::new("bench").blackboard(def.clone()).build(root).unwrap();
        let mut component =
            TreeComponent::new(1u64, tree, Blackboard::new(def)).with_config(RuntimeConfig::default());
        component.start_logic().unwrap();
        let mut world = World;
        let mut ctx = TickContext::new(0, 0.1, 0);

        group.bench_with_input(BenchmarkId::from_parameter(guards), &guards, |b, &_n| {
            b.iter(|| {
                ctx = ctx.advance(0.1);
                component.tick(&ctx, &mut world);
                black_box(component.active_task());
            })
        });
    }

    group.finish();
}

fn bench_reactive_switch(c: &mut Criterion) {
    let def = BlackboardDef::builder("bench")
        .key("alert", ValueType::Bool)
        .build()
        .unwrap();
    let alert = def.key::<bool>("alert").unwrap();
    let key = alert.id();

    let root = CompositeSpec::<World>::selector("root")
        .child(
            ChildSpec::task(TaskSpec::new("respond", || Wait::new(1.0e9))).decorator(
                DecoratorSpec::new("alert", move || BlackboardCondition::is_set(key))
                    .abort_mode(AbortMode::Both)
                    .observes(key),
            ),
        )
        .task(TaskSpec::new("patrol", || Wait::new(1.0e9)));
    let tree = TreeBuilder::new("switch").blackboard(def.clone()).build(root).unwrap();
    let mut component = TreeComponent::new(1u64, tree, Blackboard::new(def));
    component.start_logic().unwrap();
    let mut world = World;
    let mut ctx = TickContext::new(0, 0.1, 0);
    let mut raised = false;

    c.bench_function("bt-engine/abort_switch", |b| {
        b.iter(|| {
            raised = !raised;
            let _ = component.blackboard_mut().set(alert, raised);
            ctx = ctx.advance(0.1);
            component.tick(&ctx, &mut world);
            black_box(component.active_task());
        })
    });
}

criterion_group!(benches, bench_idle_tick, bench_reactive_switch);
criterion_main!(benches);
