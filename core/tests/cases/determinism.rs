use crate::common::TestHarness;
use queuesim_core::Producer;

fn stochastic_run(seed: u64) -> TestHarness {
    let mut h = TestHarness::new_with_seed(seed);
    let source = h.add_generator("gen0", Some(Producer::expo(1.0)));
    source.set_limit(Some(50));
    let res = h.sim.add_resource("res0", 1, None, None).unwrap();
    res.set_random("service", [(0.0, Producer::uniform(0.5, 1.5))]).unwrap();
    h.connect(&["gen0", "res0"]);
    h.run_for(200.0);
    h
}

#[test]
fn test_determinism_across_runs() {
    let h1 = stochastic_run(12345);
    let h2 = stochastic_run(12345);

    let (log1, log2) = (h1.csv(), h2.csv());
    assert!(!log1.is_empty());
    assert_eq!(log1.len(), log2.len(), "Record count mismatch");
    for (i, (a, b)) in log1.iter().zip(&log2).enumerate() {
        assert_eq!(a, b, "Record mismatch at index {}", i);
    }
}

#[test]
fn test_determinism_with_different_seeds() {
    let h1 = stochastic_run(100);
    let h2 = stochastic_run(200);

    assert_ne!(h1.csv(), h2.csv(), "Different seeds should produce different logs");
}
