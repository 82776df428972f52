use crate::common::TestHarness;
use queuesim_core::{MetricsSink, Producer, SimError, Tee};

#[test]
fn test_merge_is_idempotent() {
    let mut h = TestHarness::new();
    h.add_single_shot("gen0", 0.0);
    h.add_server("A", 1, 1.0, None);
    h.add_server("B", 1, 1.0, None);
    let ab = h.connect(&["gen0", "A"]);
    let ac = h.connect(&["gen0", "B"]);

    let merged = h.sim.merge_pipeline(&[ab.clone(), ac.clone()]).unwrap();
    let swapped = h.sim.merge_pipeline(&[ac, ab.clone()]).unwrap();
    let again = h.sim.merge_pipeline(&[merged.clone(), ab]).unwrap();

    assert_eq!(merged.next_hops("gen0"), ["A", "B"]);
    assert_eq!(swapped.next_hops("gen0"), ["B", "A"]);
    assert_eq!(again.adjacency(), merged.adjacency());
    assert_eq!(again.id(), 4);
    assert_eq!(h.sim.pipelines().len(), 5);
}

#[test]
fn test_time_varying_arrivals() {
    let mut h = TestHarness::new();
    let source = h.add_generator("gen0", None);
    source.set_random("arrival", [(0.0, Producer::constant(1.0)), (5.0, Producer::constant(2.5))])
        .unwrap();
    h.add_server("res0", 1, 0.5, None);
    h.connect(&["gen0", "res0"]);
    h.run_for(10.0);

    assert_eq!(h.times("pipe.in"), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 7.5]);
}

#[test]
fn test_leading_gap_defers_to_first_window() {
    let mut h = TestHarness::new();
    let source = h.add_generator("gen0", None);
    source.set_random("arrival", [(2.0, Producer::constant(3.0))]).unwrap();
    h.add_server("res0", 1, 0.5, None);
    h.connect(&["gen0", "res0"]);
    h.run_for(12.0);

    assert_eq!(h.times("pipe.in"), vec![0.0, 5.0, 8.0, 11.0]);
}

#[test]
fn test_interrupting_finished_process_fails() {
    let mut h = TestHarness::new();
    let process = h.sim.env().process(async {});
    h.sim.run(None).unwrap();

    assert!(!process.is_alive());
    assert!(matches!(
        h.sim.env().interrupt(&process, "late"),
        Err(SimError::ProcessFinished(_))
    ));
}

#[test]
fn test_metrics_from_log_stream() {
    let mut h = TestHarness::new();
    let metrics = MetricsSink::default();
    h.sim.set_log_sink(Tee::new().with(h.sink.clone()).with(metrics.clone()));
    h.add_generator("gen0", Some(Producer::constant(3.0)));
    h.add_server("res0", 1, 1.5, None);
    h.connect(&["gen0", "res0"]);
    h.run_for(30.0);

    let report = metrics.resource("res0").unwrap();
    assert_eq!(report.arrivals, 10);
    assert_eq!(report.served, 10);
    assert_eq!(report.p50_wait, Some(0.0));
    assert_eq!(report.p99_sojourn, Some(1.5));
    assert!(report.dropped.is_empty());
    assert_eq!(h.sink.with_event("resource.serve").len(), 10);
}
