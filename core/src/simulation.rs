use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use crate::config::{ResourceSpec, SimulationConfig};
use crate::context::SimContext;
use crate::disciplines::{FifoConfig, FifoPipe};
use crate::engine::{Environment, SimTime};
use crate::error::{SimError, SimResult};
use crate::event::Event;
use crate::generator::GeneratorState;
use crate::pipeline::{Node, Pipeline};
use crate::registry::BehaviorRegistry;
use crate::resource::Resource;
use crate::service::DefaultService;
use crate::trace::LogSink;

/// Outcome of one call to [`Simulation::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub seed: u64,
    pub end_time: SimTime,
    pub events: u64,
    pub execution_time: Duration,
}

/// Owns a simulation: its context, the behavior registry and the pipelines
/// built so far.
pub struct Simulation {
    config: SimulationConfig,
    ctx: SimContext,
    registry: BehaviorRegistry,
    pipelines: Vec<Pipeline>,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        let ctx = SimContext::new(config.seed, config.log_properties.clone());
        Self { config, ctx, registry: BehaviorRegistry::with_builtins(), pipelines: Vec::new() }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    pub fn env(&self) -> &Environment {
        self.ctx.env()
    }

    pub fn now(&self) -> SimTime {
        self.ctx.now()
    }

    pub fn registry(&self) -> &BehaviorRegistry {
        &self.registry
    }

    /// User factories must be registered before the resources that name them.
    pub fn registry_mut(&mut self) -> &mut BehaviorRegistry {
        &mut self.registry
    }

    pub fn set_log_sink(&mut self, sink: impl LogSink + 'static) {
        self.ctx.set_sink(Box::new(sink));
    }

    /// Adds `name` to the properties copied into every log record.
    pub fn log_property(&mut self, name: &str) {
        self.ctx.add_log_property(name);
    }

    fn ensure_unique(&self, id: &str) -> SimResult<()> {
        if self.ctx.has_resource(id) {
            return Err(SimError::DuplicateResource(id.to_string()));
        }
        Ok(())
    }

    /// Adds a generator driven by the named generator behavior (`default`
    /// when `None`). It starts emitting once the simulation runs.
    pub fn add_generator(&mut self, id: &str, behavior: Option<&str>) -> SimResult<Resource> {
        self.ensure_unique(id)?;
        let behavior = self.registry.generator(behavior.unwrap_or("default"), &Value::Null)?;
        let state = GeneratorState::new(&self.ctx, id, behavior);
        let generator = Resource::new(
            &self.ctx,
            id,
            1,
            Rc::new(DefaultService),
            Rc::new(FifoPipe::new(FifoConfig::default())),
            Some(state),
        )?;
        self.ctx.insert_resource(generator.clone())?;
        generator.start_generator();
        log::debug!("added generator '{id}'");
        Ok(generator)
    }

    /// Adds a resource with `capacity` service slots. `behavior` names a
    /// service behavior and `discipline` a pipe policy; both default to the
    /// built-in FIFO server.
    pub fn add_resource(
        &mut self,
        id: &str,
        capacity: usize,
        behavior: Option<&str>,
        discipline: Option<&str>,
    ) -> SimResult<Resource> {
        let spec = ResourceSpec {
            id: id.to_string(),
            capacity,
            service: behavior.unwrap_or("default").to_string(),
            pipe: discipline.unwrap_or("fifo").to_string(),
            ..ResourceSpec::default()
        };
        self.add_resource_spec(&spec)
    }

    pub fn add_resource_spec(&mut self, spec: &ResourceSpec) -> SimResult<Resource> {
        self.ensure_unique(&spec.id)?;
        let service = self.registry.service(&spec.service, &spec.service_config)?;
        let policy = self.registry.pipe(&spec.pipe, &spec.pipe_config)?;
        let resource = Resource::new(&self.ctx, &spec.id, spec.capacity, service, policy, None)?;
        resource.set_log(spec.log);
        self.ctx.insert_resource(resource.clone())?;
        log::debug!(
            "added resource '{}' (capacity {}, service '{}', pipe '{}')",
            spec.id,
            spec.capacity,
            spec.service,
            spec.pipe
        );
        Ok(resource)
    }

    pub fn resource(&self, id: &str) -> SimResult<Resource> {
        self.ctx.resource(id)
    }

    /// Chains `nodes` into a new pipeline: each node feeds the next.
    pub fn add_pipeline(&mut self, nodes: &[Node]) -> SimResult<Pipeline> {
        if nodes.len() < 2 {
            return Err(SimError::InvalidPipeline(format!(
                "a pipeline needs at least two nodes, got {}",
                nodes.len()
            )));
        }
        for node in nodes {
            if let Node::Resource(id) = node {
                self.ctx.resource(id)?;
            }
        }
        let mut pipeline = Pipeline::new(self.pipelines.len());
        for pair in nodes.windows(2) {
            pipeline.add_pipe(&pair[0], &pair[1])?;
        }
        Ok(self.register(pipeline))
    }

    /// Unions `pipelines` into a new pipeline.
    pub fn merge_pipeline(&mut self, pipelines: &[Pipeline]) -> SimResult<Pipeline> {
        if pipelines.is_empty() {
            return Err(SimError::InvalidPipeline("nothing to merge".into()));
        }
        let mut merged = Pipeline::new(self.pipelines.len());
        for pipeline in pipelines {
            merged.merge_pipe(pipeline);
        }
        Ok(self.register(merged))
    }

    pub fn pipeline(&self, id: usize) -> SimResult<&Pipeline> {
        self.pipelines.get(id).ok_or(SimError::UnknownPipeline(id))
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    /// Records `pipeline` and rebinds the templates of the generators it
    /// contains, so later emissions route by it.
    fn register(&mut self, pipeline: Pipeline) -> Pipeline {
        let shared = Rc::new(pipeline.clone());
        for resource in self.ctx.resources() {
            if resource.is_generator() && shared.contains(resource.id()) {
                resource.rebind(shared.clone());
            }
        }
        log::debug!("pipeline {}: {:?}", pipeline.id(), pipeline.adjacency());
        self.pipelines.push(pipeline.clone());
        pipeline
    }

    /// Runs until `until` (or the configured horizon), or until no events
    /// remain when neither is set.
    pub fn run(&mut self, until: Option<SimTime>) -> SimResult<RunSummary> {
        let until = until.or(self.config.until);
        if let Some(limit) = until {
            if limit < self.now() {
                return Err(SimError::NegativeDelay(limit - self.now()));
            }
        }
        log::info!("{}: running from t={} until {:?} (seed {})", self.config.id, self.now(), until, self.config.seed);
        let started = Instant::now();
        let before = self.env().processed_events();
        self.env().run(until);
        Ok(self.finish(started, before))
    }

    /// Runs until `event` has been processed or no events remain.
    pub fn run_until(&mut self, event: &Event) -> SimResult<RunSummary> {
        let started = Instant::now();
        let before = self.env().processed_events();
        self.env().run_until(event);
        Ok(self.finish(started, before))
    }

    fn finish(&self, started: Instant, before: u64) -> RunSummary {
        self.ctx.flush();
        let summary = RunSummary {
            seed: self.config.seed,
            end_time: self.now(),
            events: self.env().processed_events() - before,
            execution_time: started.elapsed(),
        };
        log::info!(
            "{}: stopped at t={} after {} events in {:?}",
            self.config.id,
            summary.end_time,
            summary.events,
            summary.execution_time
        );
        summary
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.ctx.env().shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::Producer;
    use crate::trace::MemorySink;

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut sim = Simulation::new(SimulationConfig::default());
        sim.add_generator("node", None).unwrap();
        assert!(matches!(
            sim.add_resource("node", 1, None, None),
            Err(SimError::DuplicateResource(_))
        ));
        assert!(matches!(sim.add_generator("node", None), Err(SimError::DuplicateResource(_))));
    }

    #[test]
    fn test_unknown_behaviors_fail_fast() {
        let mut sim = Simulation::new(SimulationConfig::default());
        assert!(matches!(
            sim.add_resource("res0", 1, Some("teleport"), None),
            Err(SimError::UnknownBehavior { kind: "service", .. })
        ));
        assert!(!sim.context().has_resource("res0"));
    }

    #[test]
    fn test_pipeline_validation() {
        let mut sim = Simulation::new(SimulationConfig::default());
        let res = sim.add_resource("res0", 1, None, None).unwrap();
        assert!(matches!(sim.add_pipeline(&[(&res).into()]), Err(SimError::InvalidPipeline(_))));
        assert!(matches!(
            sim.add_pipeline(&[(&res).into(), "ghost".into()]),
            Err(SimError::UnknownResource(_))
        ));
        assert!(matches!(sim.pipeline(3), Err(SimError::UnknownPipeline(3))));
    }

    #[test]
    fn test_run_uses_configured_horizon() {
        let mut sim = Simulation::new(SimulationConfig::default().with_until(12.0));
        let sink = MemorySink::new();
        sim.set_log_sink(sink.clone());
        let source = sim.add_generator("gen0", None).unwrap();
        source.set_random("arrival", [(0.0, Producer::constant(4.0))]).unwrap();
        let res = sim.add_resource("res0", 1, None, None).unwrap();
        sim.add_pipeline(&[(&source).into(), (&res).into()]).unwrap();

        let summary = sim.run(None).unwrap();
        assert_eq!(summary.end_time, 12.0);
        assert_eq!(summary.seed, 42);
        assert!(summary.events > 0);
        assert_eq!(sink.with_event("pipe.in").len(), 3);
    }

    #[test]
    fn test_run_until_event() {
        let mut sim = Simulation::new(SimulationConfig::default());
        let stop = sim.env().timeout(7.5);
        let summary = sim.run_until(&stop).unwrap();
        assert_eq!(summary.end_time, 7.5);
    }
}
