use bt_tools::{SharedTraceSink, TraceEvent, TraceLog, TraceSink, VecTraceSink};

#[test]
fn vec_sink_keeps_emission_order() {
    let mut sink = VecTraceSink::default();
    sink.emit(TraceEvent::new(1, "first").with_a(10).with_b(20));
    sink.emit(TraceEvent::new(2, "second"));

    assert_eq!(sink.events.len(), 2);
    assert_eq!(sink.events[0].tag, "first");
    assert_eq!(sink.events[0].a, 10);
    assert_eq!(sink.events[0].b, 20);
    assert_eq!(sink.events[1].tick, 2);
}

#[test]
fn shared_sink_is_readable_after_boxing() {
    let handle = SharedTraceSink::new();
    let mut boxed: Box<dyn TraceSink> = Box::new(handle.clone());

    boxed.emit(TraceEvent::new(4, "bt.task.execute").with_b(2));
    boxed.emit(TraceEvent::new(4, "bt.task.finished").with_b(2));

    let events = handle.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].tag, "bt.task.finished");

    assert_eq!(handle.take().len(), 2);
    assert!(handle.events().is_empty());
}

#[test]
fn trace_log_filters_by_tag() {
    let mut log = TraceLog::default();
    log.emit(TraceEvent::new(1, "bt.aux.add").with_b(1));
    log.emit(TraceEvent::new(1, "bt.task.execute").with_b(3));
    log.emit(TraceEvent::new(2, "bt.aux.add").with_b(4));

    assert_eq!(log.count("bt.aux.add"), 2);
    assert_eq!(
        log.with_tag("bt.aux.add").map(|e| e.b).collect::<Vec<_>>(),
        vec![1, 4]
    );
    assert_eq!(log.count("bt.aux.remove"), 0);

    log.clear();
    assert!(log.events.is_empty());
}

#[test]
fn display_includes_tick_tag_and_payload() {
    let text = TraceEvent::new(7, "bt.search.start").with_a(1).with_b(9).to_string();
    assert!(text.contains("7"));
    assert!(text.contains("bt.search.start"));
    assert!(text.contains("a=1 b=9"));
}
