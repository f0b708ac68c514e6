#![cfg(feature = "serialize")]

use bt_engine::{AbortMode, CompositePolicy, LogicOp, NodeResult};

#[test]
fn results_json_roundtrip() {
    let results = vec![
        NodeResult::Succeeded,
        NodeResult::Failed,
        NodeResult::Aborted,
        NodeResult::InProgress,
    ];
    let json = serde_json::to_string(&results).expect("serialize");
    let roundtrip: Vec<NodeResult> = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(roundtrip, results);
}

#[test]
fn node_settings_json_roundtrip() {
    let settings = (CompositePolicy::Selector, AbortMode::LowerPriority);
    let json = serde_json::to_string(&settings).expect("serialize");
    let roundtrip: (CompositePolicy, AbortMode) = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(roundtrip, settings);

    // OR(a, NOT(b))
    let ops = vec![
        LogicOp::Or(2),
        LogicOp::Test(0),
        LogicOp::Not(1),
        LogicOp::Test(1),
    ];
    let json = serde_json::to_string(&ops).expect("serialize");
    let roundtrip: Vec<LogicOp> = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(roundtrip, ops);
}
