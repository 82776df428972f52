use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::disciplines::{
    FifoConfig, FifoPipe, PreemptionConfig, PreemptivePipe, PriorityConfig, PriorityPipe,
    RoundRobinConfig, RoundRobinPipe, TokenBucket, TokenBucketConfig, WfqConfig, WfqPipe,
};
use crate::error::{SimError, SimResult};
use crate::generator::{ArrivalProcess, GeneratorBehavior};
use crate::pipe::PipePolicy;
use crate::queue::{Fifo, QueueDiscipline};
use crate::service::{DefaultService, PreemptiveService, ServiceBehavior};

type Factory<T> = Box<dyn Fn(&Value) -> SimResult<T>>;

/// Name-to-factory tables for every pluggable behavior.
///
/// Factories receive the behavior's JSON config (`Value::Null` when none was
/// given) and deserialize it into the behavior's config struct.
pub struct BehaviorRegistry {
    services: IndexMap<String, Factory<Rc<dyn ServiceBehavior>>>,
    pipes: IndexMap<String, Factory<Rc<dyn PipePolicy>>>,
    queues: IndexMap<String, Factory<Box<dyn QueueDiscipline>>>,
    generators: IndexMap<String, Factory<Rc<dyn GeneratorBehavior>>>,
}

macro_rules! register_components {
    ($registry:ident . $register:ident as $target:ty {
        $($kind:expr => |$cfg:ident : $config:ty| $build:expr),* $(,)?
    }) => {
        $(
            $registry.$register($kind, |data: &Value| {
                let $cfg: $config = if data.is_null() {
                    Default::default()
                } else {
                    serde_json::from_value(data.clone())?
                };
                let behavior: $target = $build;
                Ok(behavior)
            });
        )*
    };
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl BehaviorRegistry {
    pub fn empty() -> Self {
        Self {
            services: IndexMap::new(),
            pipes: IndexMap::new(),
            queues: IndexMap::new(),
            generators: IndexMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        register_components!(registry.register_service as Rc<dyn ServiceBehavior> {
            "default" => |_config: ()| Rc::new(DefaultService),
            "preemptive" => |_config: ()| Rc::new(PreemptiveService),
        });

        register_components!(registry.register_pipe as Rc<dyn PipePolicy> {
            "default" => |config: FifoConfig| Rc::new(FifoPipe::new(config)),
            "fifo" => |config: FifoConfig| Rc::new(FifoPipe::new(config)),
            "priority" => |config: PriorityConfig| Rc::new(PriorityPipe::new(config)),
            "preemption" => |config: PreemptionConfig| Rc::new(PreemptivePipe::new(config)),
            "wfq" => |config: WfqConfig| Rc::new(WfqPipe::new(config)),
            "round_robin" => |config: RoundRobinConfig| Rc::new(RoundRobinPipe::new(config)),
        });

        register_components!(registry.register_queue as Box<dyn QueueDiscipline> {
            "default" => |_config: ()| Box::new(Fifo),
            "fifo" => |_config: ()| Box::new(Fifo),
            "token_bucket" => |config: TokenBucketConfig| Box::new(TokenBucket::from_config(config)),
        });

        register_components!(registry.register_generator as Rc<dyn GeneratorBehavior> {
            "default" => |_config: ()| Rc::new(ArrivalProcess),
        });

        registry
    }

    pub fn register_service(
        &mut self,
        name: &str,
        factory: impl Fn(&Value) -> SimResult<Rc<dyn ServiceBehavior>> + 'static,
    ) {
        self.services.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_pipe(
        &mut self,
        name: &str,
        factory: impl Fn(&Value) -> SimResult<Rc<dyn PipePolicy>> + 'static,
    ) {
        self.pipes.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_queue(
        &mut self,
        name: &str,
        factory: impl Fn(&Value) -> SimResult<Box<dyn QueueDiscipline>> + 'static,
    ) {
        self.queues.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_generator(
        &mut self,
        name: &str,
        factory: impl Fn(&Value) -> SimResult<Rc<dyn GeneratorBehavior>> + 'static,
    ) {
        self.generators.insert(name.to_string(), Box::new(factory));
    }

    pub fn service(&self, name: &str, config: &Value) -> SimResult<Rc<dyn ServiceBehavior>> {
        build(&self.services, "service", name, config)
    }

    pub fn pipe(&self, name: &str, config: &Value) -> SimResult<Rc<dyn PipePolicy>> {
        build(&self.pipes, "pipe", name, config)
    }

    pub fn queue(&self, name: &str, config: &Value) -> SimResult<Box<dyn QueueDiscipline>> {
        build(&self.queues, "queue", name, config)
    }

    pub fn generator(&self, name: &str, config: &Value) -> SimResult<Rc<dyn GeneratorBehavior>> {
        build(&self.generators, "generator", name, config)
    }

    /// Registered names per behavior family.
    pub fn catalog(&self) -> Vec<(&'static str, Vec<String>)> {
        vec![
            ("service", self.services.keys().cloned().collect()),
            ("pipe", self.pipes.keys().cloned().collect()),
            ("queue", self.queues.keys().cloned().collect()),
            ("generator", self.generators.keys().cloned().collect()),
        ]
    }
}

fn build<T>(
    table: &IndexMap<String, Factory<T>>,
    kind: &'static str,
    name: &str,
    config: &Value,
) -> SimResult<T> {
    let factory = table
        .get(name)
        .ok_or_else(|| SimError::UnknownBehavior { kind, name: name.to_string() })?;
    factory(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_resolve() {
        let registry = BehaviorRegistry::with_builtins();
        assert_eq!(registry.pipe("priority", &Value::Null).unwrap().kind(), "priority");
        assert_eq!(registry.pipe("wfq", &json!({ "rate": 6.0, "classes": 2 })).unwrap().kind(), "wfq");
        assert_eq!(registry.queue("token_bucket", &Value::Null).unwrap().kind(), "token_bucket");
        assert!(registry.service("preemptive", &Value::Null).is_ok());
        assert!(registry.generator("default", &Value::Null).is_ok());
    }

    #[test]
    fn test_unknown_name() {
        let registry = BehaviorRegistry::with_builtins();
        assert!(matches!(
            registry.pipe("lifo", &Value::Null),
            Err(SimError::UnknownBehavior { kind: "pipe", .. })
        ));
    }

    #[test]
    fn test_bad_config_is_reported() {
        let registry = BehaviorRegistry::with_builtins();
        assert!(matches!(
            registry.pipe("priority", &json!({ "classes": "many" })),
            Err(SimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_user_factory() {
        let mut registry = BehaviorRegistry::empty();
        registry.register_pipe("two_class", |_| Ok(Rc::new(PriorityPipe::new(PriorityConfig { classes: 2, capacity: None }))));
        assert!(registry.pipe("two_class", &Value::Null).is_ok());
        assert!(registry.pipe("fifo", &Value::Null).is_err());
    }
}
