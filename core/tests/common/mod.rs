use queuesim_core::*;

pub struct TestHarness {
    pub sim: Simulation,
    pub sink: MemorySink,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(SimulationConfig::default())
    }

    pub fn new_with_seed(seed: u64) -> Self {
        Self::with_config(SimulationConfig::default().with_seed(seed))
    }

    pub fn with_config(config: SimulationConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut sim = Simulation::new(config);
        let sink = MemorySink::new();
        sim.set_log_sink(sink.clone());
        Self { sim, sink }
    }

    /// Generator emitting every `arrival` time units (once when `None`).
    pub fn add_generator(&mut self, id: &str, arrival: Option<Producer>) -> Resource {
        let source = self.sim.add_generator(id, None).unwrap();
        if let Some(arrival) = arrival {
            source.set_random("arrival", [(0.0, arrival)]).unwrap();
        }
        source
    }

    /// Generator emitting a single message at `at`.
    pub fn add_single_shot(&mut self, id: &str, at: f64) -> Resource {
        let source = self.sim.add_generator(id, None).unwrap();
        source.set_random("initial", [(0.0, Producer::constant(at))]).unwrap();
        source
    }

    pub fn add_server(
        &mut self,
        id: &str,
        capacity: usize,
        service: f64,
        discipline: Option<&str>,
    ) -> Resource {
        let res = self.sim.add_resource(id, capacity, None, discipline).unwrap();
        res.set_random("service", [(0.0, Producer::constant(service))]).unwrap();
        res
    }

    pub fn connect(&mut self, ids: &[&str]) -> Pipeline {
        let nodes: Vec<Node> = ids.iter().map(|id| Node::from(*id)).collect();
        self.sim.add_pipeline(&nodes).unwrap()
    }

    pub fn run_for(&mut self, until: f64) -> RunSummary {
        self.sim.run(Some(until)).unwrap()
    }

    pub fn times(&self, event: &str) -> Vec<f64> {
        self.sink.with_event(event).iter().map(|t| t.time).collect()
    }

    /// Message ids in the order they completed service at `resource`.
    pub fn served_at(&self, resource: &str) -> Vec<String> {
        self.sink
            .with_event("resource.serve")
            .into_iter()
            .filter(|t| t.resource == resource)
            .map(|t| t.message)
            .collect()
    }

    pub fn csv(&self) -> Vec<String> {
        self.sink.entries().iter().map(Timestamp::to_csv).collect()
    }
}
