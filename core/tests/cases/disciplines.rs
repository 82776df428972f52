use crate::common::TestHarness;
use queuesim_core::{Producer, Resource, ResourceSpec, SimulationConfig};
use serde_json::json;

fn with_priority(source: Resource, priority: i64) -> Resource {
    source.message().unwrap().set_property("priority", priority);
    source
}

#[test]
fn test_strict_priority_order() {
    let mut h = TestHarness::new();
    h.add_single_shot("blocker", 0.0);
    with_priority(h.add_single_shot("low", 0.1), 2);
    with_priority(h.add_single_shot("mid", 0.2), 1);
    with_priority(h.add_single_shot("high", 0.3), 0);
    h.add_server("res0", 1, 1.0, Some("priority"));
    for source in ["blocker", "low", "mid", "high"] {
        h.connect(&[source, "res0"]);
    }
    h.run_for(10.0);

    assert_eq!(h.served_at("res0"), vec!["blocker", "high", "mid", "low"]);
    assert_eq!(h.times("resource.serve"), vec![1.0, 2.0, 3.0, 4.0]);
}

fn preemptive_server(h: &mut TestHarness, capacity: usize, mode: &str) {
    let spec = ResourceSpec {
        id: "res0".into(),
        capacity,
        service: "preemptive".into(),
        pipe: "preemption".into(),
        pipe_config: json!({ "mode": mode }),
        ..ResourceSpec::default()
    };
    let res = h.sim.add_resource_spec(&spec).unwrap();
    res.set_random("service", [(0.0, Producer::constant(4.0))]).unwrap();
}

/// Runs single-shot sources given as `(id, arrival, priority)` into a
/// preemptive `res0` with 4.0 units of service each.
fn preemption_scenario(capacity: usize, mode: &str, sources: &[(&str, f64, i64)]) -> TestHarness {
    let mut h = TestHarness::with_config(SimulationConfig::default().with_log_property("preemptions"));
    for (id, at, priority) in sources {
        with_priority(h.add_single_shot(id, *at), *priority);
    }
    preemptive_server(&mut h, capacity, mode);
    for (id, _, _) in sources {
        h.connect(&[*id, "res0"]);
    }
    h.run_for(30.0);
    h
}

fn preemption_run(mode: &str) -> TestHarness {
    preemption_scenario(1, mode, &[("low", 0.0, 2), ("high", 1.0, 0)])
}

fn serve_order(h: &TestHarness) -> Vec<(String, f64)> {
    h.sink.with_event("resource.serve").into_iter().map(|t| (t.message, t.time)).collect()
}

fn owned(order: &[(&str, f64)]) -> Vec<(String, f64)> {
    order.iter().map(|(id, t)| (id.to_string(), *t)).collect()
}

#[test]
fn test_preemption_resumes_remaining_service() {
    let h = preemption_run("resume");

    assert_eq!(h.times("resource.preempted"), vec![1.0]);
    let serves = h.sink.with_event("resource.serve");
    let order: Vec<(&str, f64)> = serves.iter().map(|t| (t.message.as_str(), t.time)).collect();
    assert_eq!(order, vec![("high", 5.0), ("low", 8.0)]);
    assert_eq!(serves[0].properties, vec![("preemptions".to_string(), json!("NA"))]);
    assert_eq!(serves[1].properties, vec![("preemptions".to_string(), json!(1))]);
}

#[test]
fn test_preemption_restart_redraws_service() {
    let h = preemption_run("restart");

    assert_eq!(serve_order(&h), owned(&[("high", 5.0), ("low", 9.0)]));
}

#[test]
fn test_preemption_with_free_slot() {
    let h = preemption_scenario(2, "resume", &[("low", 0.0, 2), ("high", 1.0, 0)]);

    assert_eq!(h.times("resource.preempted"), vec![1.0]);
    assert_eq!(serve_order(&h), owned(&[("low", 4.0), ("high", 5.0)]));
}

#[test]
fn test_repeated_preemption_accumulates() {
    let h = preemption_scenario(
        1,
        "resume",
        &[("low", 0.0, 2), ("h1", 1.0, 0), ("h2", 6.0, 0)],
    );

    assert_eq!(h.times("resource.preempted"), vec![1.0, 6.0]);
    assert_eq!(serve_order(&h), owned(&[("h1", 5.0), ("h2", 10.0), ("low", 12.0)]));
    let low = h.sink.with_event("resource.serve").into_iter().find(|t| t.message == "low").unwrap();
    assert_eq!(low.properties, vec![("preemptions".to_string(), json!(2))]);
}

#[test]
fn test_preempted_queue_serves_better_class_first() {
    let h = preemption_scenario(
        2,
        "resume",
        &[("mid", 0.0, 1), ("low", 0.5, 2), ("h1", 1.0, 0), ("h2", 2.0, 0)],
    );

    assert_eq!(h.times("resource.preempted"), vec![1.0, 2.0]);
    assert_eq!(
        serve_order(&h),
        owned(&[("h1", 5.0), ("h2", 6.0), ("mid", 7.0), ("low", 9.5)])
    );
}

#[test]
fn test_round_robin_alternates_queues() {
    let mut h = TestHarness::new();
    h.add_single_shot("blocker", 0.0);
    for (id, initial, queue) in [("genA", 0.1, 0), ("genB", 0.3, 1)] {
        let source = with_priority(h.add_single_shot(id, initial), queue);
        source.set_random("arrival", [(0.0, Producer::constant(0.1))]).unwrap();
        source.set_limit(Some(2));
    }
    h.add_server("res0", 1, 1.0, Some("round_robin"));
    for source in ["blocker", "genA", "genB"] {
        h.connect(&[source, "res0"]);
    }
    h.run_for(10.0);

    assert_eq!(h.served_at("res0"), vec!["blocker", "genB", "genA", "genB", "genA"]);
}

#[test]
fn test_round_robin_default_queues() {
    let mut h = TestHarness::new();
    let res = h.add_server("res0", 1, 1.0, Some("round_robin"));
    assert_eq!(res.pipe().queue_keys(), vec!["0", "1", "2", "3"]);
}

#[test]
fn test_wfq_bucket_shapes_and_rejects() {
    let mut h = TestHarness::new();
    let source = h.add_generator("gen0", Some(Producer::constant(0.25)));
    source.set_limit(Some(4));
    let spec = ResourceSpec {
        id: "res0".into(),
        pipe: "wfq".into(),
        pipe_config: json!({ "rate": 1.0, "classes": 1 }),
        ..ResourceSpec::default()
    };
    h.sim.add_resource_spec(&spec).unwrap();
    h.connect(&["gen0", "res0"]);
    h.run_for(10.0);

    assert_eq!(h.times("resource.serve"), vec![0.0, 1.0]);
    assert_eq!(h.times("pipe.0.full"), vec![0.5, 0.75]);
}
