use bt_core::NodeIndex;

#[test]
fn lower_instance_always_wins_regardless_of_execution_index() {
    let cases = [(0u16, 500u16, 1u16, 0u16), (2, 0, 3, 65535), (0, 65535, 1, 0)];
    for (ia, ea, ib, eb) in cases {
        let a = NodeIndex::new(ia, ea);
        let b = NodeIndex::new(ib, eb);
        assert!(a.takes_priority_over(b), "{a} should outrank {b}");
        assert!(!b.takes_priority_over(a), "{b} should not outrank {a}");
    }
}

#[test]
fn execution_index_orders_within_one_instance() {
    let a = NodeIndex::new(1, 3);
    let b = NodeIndex::new(1, 7);
    assert!(a.takes_priority_over(b));
    assert!(!b.takes_priority_over(a));
    assert!(!a.takes_priority_over(a));
}

#[test]
fn derived_ord_matches_priority() {
    let mut indices = vec![
        NodeIndex::new(1, 0),
        NodeIndex::new(0, 9),
        NodeIndex::new(0, 2),
        NodeIndex::new(2, 1),
    ];
    indices.sort();
    assert_eq!(
        indices,
        vec![
            NodeIndex::new(0, 2),
            NodeIndex::new(0, 9),
            NodeIndex::new(1, 0),
            NodeIndex::new(2, 1),
        ]
    );
    for pair in indices.windows(2) {
        assert!(pair[0].takes_priority_over(pair[1]));
    }
}

#[test]
fn previous_stops_at_zero() {
    assert_eq!(NodeIndex::new(3, 4).previous(), Some(NodeIndex::new(3, 3)));
    assert_eq!(NodeIndex::new(3, 0).previous(), None);
}

#[test]
fn display_is_instance_colon_execution() {
    assert_eq!(NodeIndex::new(2, 17).to_string(), "2:17");
    assert_eq!(NodeIndex::ROOT.to_string(), "0:0");
}
