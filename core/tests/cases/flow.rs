use std::rc::Rc;

use crate::common::TestHarness;
use queuesim_core::{service_fn, Interrupt, Message, Producer, ServiceContext};

#[test]
fn test_constant_arrivals_are_served_on_arrival() {
    let mut h = TestHarness::new();
    h.add_generator("gen0", Some(Producer::constant(3.0)));
    h.add_server("res0", 1, 1.5, None);
    h.connect(&["gen0", "res0"]);

    let summary = h.run_for(30.0);
    assert_eq!(summary.end_time, 30.0);

    let arrivals: Vec<f64> = (0..10).map(|i| i as f64 * 3.0).collect();
    let completions: Vec<f64> = arrivals.iter().map(|t| t + 1.5).collect();
    assert_eq!(h.times("pipe.in"), arrivals);
    assert_eq!(h.times("pipe.out"), arrivals);
    assert_eq!(h.times("resource.serve"), completions);

    let seqs: Vec<u64> = h.sink.with_event("resource.serve").iter().map(|t| t.seq_num).collect();
    assert_eq!(seqs, (0..10).collect::<Vec<u64>>());
}

#[test]
fn test_capacity_never_exceeded() {
    let mut h = TestHarness::new();
    let source = h.add_generator("gen0", Some(Producer::constant(0.5)));
    source.set_limit(Some(10));
    let res = h.add_server("res0", 2, 3.0, None);
    h.connect(&["gen0", "res0"]);

    let env = h.sim.env().clone();
    let mut peak = 0;
    while env.step() {
        peak = peak.max(res.task_count());
        assert!(res.task_count() <= 2, "capacity exceeded at t={}", env.now());
    }
    assert_eq!(peak, 2);
    assert_eq!(h.times("resource.serve").len(), 10);
}

#[test]
fn test_chain_forwards_after_service() {
    let mut h = TestHarness::new();
    h.add_single_shot("gen0", 0.0);
    h.add_server("A", 1, 1.0, None);
    h.add_server("B", 1, 2.0, None);
    h.connect(&["gen0", "A", "B"]);
    h.run_for(10.0);

    let serves: Vec<(String, f64)> = h
        .sink
        .with_event("resource.serve")
        .into_iter()
        .map(|t| (t.resource, t.time))
        .collect();
    assert_eq!(serves, vec![("A".to_string(), 1.0), ("B".to_string(), 3.0)]);
}

#[test]
fn test_fan_out_copies_message() {
    let mut h = TestHarness::new();
    h.add_single_shot("gen0", 0.0);
    h.add_server("A", 1, 1.0, None);
    h.add_server("B", 1, 1.0, None);
    let left = h.connect(&["gen0", "A"]);
    let right = h.connect(&["gen0", "B"]);
    h.sim.merge_pipeline(&[left, right]).unwrap();
    h.run_for(10.0);

    assert_eq!(h.served_at("A"), vec!["gen0"]);
    assert_eq!(h.served_at("B"), vec!["gen0"]);
    assert_eq!(h.times("pipe.in"), vec![0.0, 0.0]);
}

#[test]
fn test_next_hop_override_applies_to_one_step() {
    let mut h = TestHarness::new();
    h.add_single_shot("gen0", 0.0);
    let a = h.add_server("A", 1, 1.0, None);
    for id in ["B", "C", "D"] {
        h.add_server(id, 1, 1.0, None);
    }
    a.set_service(Rc::new(service_fn(|cx: ServiceContext, message: Message| async move {
        cx.timeout(1.0).await?;
        message.set_next(["C"]);
        Ok::<(), Interrupt>(())
    })));
    let main = h.connect(&["gen0", "A", "B"]);
    let detour = h.connect(&["C", "D"]);
    h.sim.merge_pipeline(&[main, detour]).unwrap();
    h.run_for(10.0);

    let serves: Vec<(String, f64)> = h
        .sink
        .with_event("resource.serve")
        .into_iter()
        .map(|t| (t.resource, t.time))
        .collect();
    assert_eq!(
        serves,
        vec![("A".to_string(), 1.0), ("C".to_string(), 2.0), ("D".to_string(), 3.0)]
    );
    assert!(h.served_at("B").is_empty());
}
