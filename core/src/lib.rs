pub mod config;
pub mod context;
pub mod disciplines;
pub mod engine;
pub mod error;
pub mod event;
pub mod generator;
pub mod message;
pub mod pipe;
pub mod pipeline;
pub mod queue;
pub mod random;
pub mod registry;
pub mod resource;
pub mod service;
pub mod simulation;
pub mod stats;
pub mod trace;

pub use config::{ResourceSpec, SimulationConfig};
pub use context::SimContext;
pub use engine::{Environment, Process, SimTime};
pub use error::{SimError, SimResult};
pub use event::{Event, Interrupt, Payload, Signal};
pub use generator::{ArrivalProcess, GeneratorBehavior};
pub use message::{Location, Message, Property};
pub use pipe::{PipeCtx, PipePolicy};
pub use pipeline::{Node, Pipeline};
pub use queue::{Fifo, QueueCx, QueueDiscipline, QueueState};
pub use random::{Producer, RandomProcess};
pub use registry::BehaviorRegistry;
pub use resource::{Resource, TaskInfo};
pub use service::{service_fn, DefaultService, PreemptiveService, ServiceBehavior, ServiceContext};
pub use simulation::{RunSummary, Simulation};
pub use stats::{MetricsSink, ResourceReport};
pub use trace::{FacadeSink, LogSink, MemorySink, Tee, Timestamp};
