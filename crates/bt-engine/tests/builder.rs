use std::rc::Rc;

use bt_core::{BlackboardDef, KeyId, ValueType, WorldMut, WorldView};
use bt_engine::node::{ChildNode, NodeKind};
use bt_engine::nodes::{BlackboardCondition, FnService, Succeed, Wait};
use bt_engine::{
    AbortMode, BehaviorTree, BuildError, ChildSpec, CompositePolicy, CompositeSpec,
    DecoratorSpec, LogicOp, NodeContext, ServiceSpec, TaskSpec, TreeBuilder,
};

struct TestWorld;

impl WorldView for TestWorld {
    type Agent = u64;
}

impl WorldMut for TestWorld {}

fn noop_service(name: &str) -> ServiceSpec<TestWorld> {
    ServiceSpec::new(name, 1.0, || {
        FnService(|_ctx: &mut NodeContext<'_, TestWorld>, _elapsed: f32| {})
    })
}

fn guarded_tree() -> Rc<BehaviorTree<TestWorld>> {
    let flag = KeyId(0);
    let root = CompositeSpec::selector("root")
        .service(noop_service("root_svc"))
        .child(
            ChildSpec::task(TaskSpec::new("a", || Wait::new(1.0)).service(noop_service("a_svc")))
                .decorator(
                    DecoratorSpec::new("gate", move || BlackboardCondition::is_set(flag))
                        .abort_mode(AbortMode::Both)
                        .observes(flag),
                ),
        )
        .composite(CompositeSpec::sequence("inner").task(TaskSpec::new("b", || Succeed)));
    TreeBuilder::new("guarded").build(root).unwrap()
}

#[test]
fn execution_indices_follow_depth_first_order() {
    let tree = guarded_tree();
    let layout = tree.layout();
    let names: Vec<&str> = layout.nodes().iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["root", "root_svc", "gate", "a_svc", "a", "inner", "b"]);

    for (i, node) in layout.nodes().iter().enumerate() {
        assert_eq!(node.execution_index as usize, i);
    }
}

#[test]
fn aux_nodes_hang_off_the_parent_composite() {
    let tree = guarded_tree();
    let layout = tree.layout();

    assert_eq!(layout.parent(1), Some(0));
    assert_eq!(layout.child_slot(1), None);
    assert_eq!(layout.parent(2), Some(0));
    assert_eq!(layout.child_slot(2), Some(0));
    assert_eq!(layout.child_slot(3), Some(0));
    assert_eq!(layout.child_slot(5), Some(1));
    assert_eq!(layout.parent(6), Some(5));
    assert_eq!(layout.depth(6), 2);

    let gate = layout.decorator(2).unwrap();
    assert_eq!(gate.abort_mode, AbortMode::Both);
    assert_eq!(gate.observed_keys, vec![KeyId(0)]);
    assert!(layout.service(1).is_some());
    assert!(layout.task(4).is_some());
}

#[test]
fn composite_child_entries_record_ranges() {
    let tree = guarded_tree();
    let layout = tree.layout();
    let root = layout.composite(0).unwrap();

    assert_eq!(root.policy, CompositePolicy::Selector);
    assert_eq!(root.services, vec![1]);
    assert_eq!(root.last_execution_index, 6);
    assert_eq!(root.children[0].node, ChildNode::Task(4));
    assert_eq!(root.children[0].decorators, vec![2]);
    assert_eq!(root.children[0].services, vec![3]);
    assert_eq!(root.children[0].first_index, 2);
    assert_eq!(root.children[1].node, ChildNode::Composite(5));
    assert_eq!(root.children[1].first_index, 5);

    assert_eq!(layout.child_execution_index(0, 0), Some(2));
    assert_eq!(layout.child_execution_index(0, 1), Some(5));
    assert_eq!(layout.child_execution_index(0, 2), Some(7));
    assert_eq!(layout.child_execution_index(0, 3), None);

    assert_eq!(layout.matching_child_slot(0, 4), Some(0));
    assert_eq!(layout.matching_child_slot(0, 6), Some(1));
    assert_eq!(layout.matching_child_slot(5, 4), None);
}

#[test]
fn same_description_builds_same_layout() {
    assert_eq!(guarded_tree().layout(), guarded_tree().layout());
}

#[test]
fn empty_composite_is_rejected() {
    let root = CompositeSpec::<TestWorld>::sequence("root")
        .composite(CompositeSpec::selector("hollow"));
    let err = TreeBuilder::new("t").build(root).unwrap_err();
    assert_eq!(err, BuildError::EmptyComposite("hollow".to_string()));
}

#[test]
fn logic_slot_out_of_range_is_rejected() {
    let root = CompositeSpec::<TestWorld>::selector("root").child(
        ChildSpec::task(TaskSpec::new("a", || Succeed))
            .decorator(DecoratorSpec::new("d", || BlackboardCondition::is_set(KeyId(0))))
            .logic([LogicOp::Not(1), LogicOp::Test(1)]),
    );
    let err = TreeBuilder::new("t").build(root).unwrap_err();
    assert_eq!(
        err,
        BuildError::InvalidDecoratorSlot {
            node: "a".to_string(),
            slot: 1,
            count: 1,
        }
    );
}

#[test]
fn malformed_logic_is_rejected() {
    let root = CompositeSpec::<TestWorld>::selector("root").child(
        ChildSpec::task(TaskSpec::new("a", || Succeed))
            .decorator(DecoratorSpec::new("d", || BlackboardCondition::is_set(KeyId(0))))
            .logic([LogicOp::And(2), LogicOp::Test(0)]),
    );
    let err = TreeBuilder::new("t").build(root).unwrap_err();
    assert!(matches!(err, BuildError::MalformedLogic { ref node, .. } if node == "a"));
}

#[test]
fn invalid_service_interval_is_rejected() {
    let root = CompositeSpec::<TestWorld>::selector("root")
        .service(noop_service("bad").random_deviation(-1.0))
        .task(TaskSpec::new("a", || Succeed));
    assert!(matches!(
        TreeBuilder::new("t").build(root),
        Err(BuildError::InvalidServiceInterval { .. })
    ));

    let zero = ServiceSpec::new("zero", 0.0, || {
        FnService(|_ctx: &mut NodeContext<'_, TestWorld>, _elapsed: f32| {})
    });
    let root = CompositeSpec::<TestWorld>::selector("root")
        .task(TaskSpec::new("a", || Succeed).service(zero));
    assert!(matches!(
        TreeBuilder::new("t").build(root),
        Err(BuildError::InvalidServiceInterval { .. })
    ));
}

#[test]
fn oversized_tree_is_rejected() {
    let mut root = CompositeSpec::<TestWorld>::sequence("root");
    for i in 0..u16::MAX {
        root = root.task(TaskSpec::new(format!("t{i}"), || Succeed));
    }
    assert!(matches!(
        TreeBuilder::new("huge").build(root),
        Err(BuildError::IndexOverflow { .. })
    ));
}

#[test]
fn subtree_tasks_are_marked() {
    let inner = TreeBuilder::<TestWorld>::new("inner")
        .build(CompositeSpec::sequence("inner_root").task(TaskSpec::new("x", || Succeed)))
        .unwrap();
    let outer = TreeBuilder::new("outer")
        .build(CompositeSpec::sequence("root").task(TaskSpec::subtree("run_inner", inner)))
        .unwrap();
    match &outer.layout().node(1).unwrap().kind {
        NodeKind::Task(def) => assert!(def.runs_subtree),
        other => panic!("unexpected kind {other:?}"),
    }
    assert!(outer.describe().contains("subtree 'run_inner'"));
}

#[test]
fn describe_lists_every_node() {
    let tree = guarded_tree();
    let text = tree.describe();
    assert!(text.starts_with("guarded (7 nodes)"));
    for name in ["root_svc", "gate", "a_svc", "inner"] {
        assert!(text.contains(name), "missing {name} in:\n{text}");
    }
    assert!(text.contains("abort=Both"));
}

#[test]
fn blackboard_asset_is_attached() {
    let def = BlackboardDef::builder("main")
        .key("flag", ValueType::Bool)
        .build()
        .unwrap();
    let tree = TreeBuilder::<TestWorld>::new("t")
        .blackboard(def.clone())
        .build(CompositeSpec::sequence("root").task(TaskSpec::new("a", || Succeed)))
        .unwrap();
    assert_eq!(tree.blackboard().map(|d| d.name()), Some("main"));
}

#[test]
fn tree_builder_shortcut_names_the_world_once() {
    let tree = BehaviorTree::<TestWorld>::builder("short")
        .build(CompositeSpec::selector("root").task(TaskSpec::new("a", || Succeed)))
        .unwrap();
    assert_eq!(tree.name(), "short");
    assert_eq!(tree.layout().len(), 2);
    assert!(tree.blackboard().is_none());
}
