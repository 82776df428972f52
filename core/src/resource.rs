use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::context::{SimContext, WeakContext};
use crate::engine::{Process, SimTime};
use crate::error::{SimError, SimResult};
use crate::event::{Event, Signal};
use crate::generator::GeneratorState;
use crate::message::{Location, Message};
use crate::pipe::{self, PipeCtx, PipePolicy, PipeState};
use crate::queue::QueueDiscipline;
use crate::random::{Producer, RandomDict, RandomProcess};
use crate::service::{ServiceBehavior, ServiceContext, ServiceFuture};

struct Task {
    message: Message,
    started: SimTime,
    interrupted: Option<SimTime>,
    process: Process,
}

/// Snapshot of one in-flight service.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: u64,
    pub message: Message,
    pub started: SimTime,
    pub interrupted: Option<SimTime>,
}

pub(crate) struct ResourceInner {
    id: String,
    capacity: usize,
    ctx: WeakContext,
    tasks: RefCell<IndexMap<u64, Task>>,
    free: Signal,
    pipe: PipeState,
    random: RefCell<RandomDict>,
    service: RefCell<Rc<dyn ServiceBehavior>>,
    log: Cell<bool>,
    generator: Option<GeneratorState>,
}

/// A server with a fixed number of concurrent service slots, fed by its
/// pipe. Generators are resources too; they carry a message template.
#[derive(Clone)]
pub struct Resource {
    inner: Rc<ResourceInner>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.inner.id)
            .field("capacity", &self.inner.capacity)
            .field("tasks", &self.inner.tasks.borrow().len())
            .finish()
    }
}

impl Resource {
    pub(crate) fn new(
        ctx: &SimContext,
        id: &str,
        capacity: usize,
        service: Rc<dyn ServiceBehavior>,
        policy: Rc<dyn PipePolicy>,
        generator: Option<GeneratorState>,
    ) -> SimResult<Self> {
        if capacity == 0 {
            return Err(SimError::ZeroCapacity(id.to_string()));
        }
        let env = ctx.env();
        let resource = Resource {
            inner: Rc::new(ResourceInner {
                id: id.to_string(),
                capacity,
                ctx: ctx.downgrade(),
                tasks: RefCell::new(IndexMap::new()),
                free: Signal::new(env, true),
                pipe: PipeState::new(env, policy.clone()),
                random: RefCell::new(RandomDict::default()),
                service: RefCell::new(service),
                log: Cell::new(true),
                generator,
            }),
        };
        policy.install(&resource.pipe())?;
        env.process(pipe::wait_loop(resource.clone()));
        Ok(resource)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn context(&self) -> SimResult<SimContext> {
        SimContext::upgrade(&self.inner.ctx)
    }

    pub fn is_generator(&self) -> bool {
        self.inner.generator.is_some()
    }

    pub(crate) fn generator_state(&self) -> Option<&GeneratorState> {
        self.inner.generator.as_ref()
    }

    pub fn log_enabled(&self) -> bool {
        self.inner.log.get()
    }

    /// Switches logging for this resource, its pipe and its queues.
    pub fn set_log(&self, enabled: bool) {
        self.inner.log.set(enabled);
    }

    pub fn pipe(&self) -> PipeCtx {
        PipeCtx::new(self.clone())
    }

    pub(crate) fn pipe_state(&self) -> &PipeState {
        &self.inner.pipe
    }

    pub fn set_random<I>(&self, name: &str, table: I) -> SimResult<()>
    where
        I: IntoIterator<Item = (SimTime, Producer)>,
    {
        let process = self.context()?.random_process(table);
        self.set_random_process(name, process);
        Ok(())
    }

    pub fn set_random_process(&self, name: &str, process: RandomProcess) {
        self.inner.random.borrow_mut().insert(name, process);
    }

    /// Value of the named random process at the current time; `None` if it
    /// is missing or its window produces nothing.
    pub fn random(&self, name: &str) -> Option<f64> {
        let now = self.context().ok()?.now();
        self.inner.random.borrow_mut().value(name, now)
    }

    pub fn set_service(&self, service: Rc<dyn ServiceBehavior>) {
        *self.inner.service.borrow_mut() = service;
    }

    pub fn add_queue(&self, key: &str, discipline: Box<dyn QueueDiscipline>, capacity: Option<f64>) {
        self.pipe().add_queue(key, discipline, capacity);
    }

    pub fn set_queue_discipline(&self, key: &str, discipline: Box<dyn QueueDiscipline>) -> SimResult<()> {
        self.pipe().replace_discipline(key, discipline)
    }

    pub fn set_queue_capacity(&self, key: &str, capacity: f64) -> SimResult<()> {
        self.pipe().set_capacity(key, capacity)
    }

    pub fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    pub fn has_free_capacity(&self) -> bool {
        self.task_count() < self.inner.capacity
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.inner
            .tasks
            .borrow()
            .iter()
            .map(|(id, t)| TaskInfo {
                id: *id,
                message: t.message.clone(),
                started: t.started,
                interrupted: t.interrupted,
            })
            .collect()
    }

    pub(crate) fn free_event(&self) -> Event {
        self.inner.free.wait()
    }

    /// Interrupts the process serving task `task` with `cause`.
    pub fn interrupt_task(&self, task: u64, cause: &str) -> SimResult<()> {
        let ctx = self.context()?;
        let process = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let entry = tasks.get_mut(&task).ok_or_else(|| SimError::UnknownTask {
                resource: self.inner.id.clone(),
                task,
            })?;
            entry.interrupted = Some(ctx.now());
            entry.process.clone()
        };
        ctx.env().interrupt(&process, cause)
    }

    /// Interrupts the task serving `message`, if any. Returns whether one was
    /// found.
    pub(crate) fn interrupt_message(&self, message: &Message, cause: &str) -> SimResult<bool> {
        let task = self
            .inner
            .tasks
            .borrow()
            .iter()
            .find(|(_, t)| t.message.ptr_eq(message))
            .map(|(id, _)| *id);
        match task {
            Some(id) => match self.interrupt_task(id, cause) {
                Ok(()) => Ok(true),
                Err(SimError::ProcessFinished(_)) => Ok(false),
                Err(err) => Err(err),
            },
            None => Ok(false),
        }
    }

    /// Entry point for messages arriving at this resource.
    pub fn enqueue(&self, message: Message) -> Option<Message> {
        self.pipe().enqueue(message)
    }

    /// Forwards `message` to each of its next hops. The last hop receives the
    /// message itself, every other hop a copy.
    pub fn send(&self, message: Message) {
        let Ok(ctx) = self.context() else { return };
        let hops = message.next();
        let last = hops.len().saturating_sub(1);
        for (i, hop) in hops.iter().enumerate() {
            let outgoing = if i == last { message.clone() } else { message.copy() };
            match ctx.resource(hop) {
                Ok(target) => {
                    target.enqueue(outgoing);
                }
                Err(err) => {
                    log::error!("{}: cannot route to '{hop}': {err}", self.inner.id);
                    let _ = outgoing.drop("unroutable");
                }
            }
        }
    }

    /// Starts serving `message` in a new task.
    pub(crate) fn serve(&self, message: Message) -> SimResult<()> {
        let ctx = self.context()?;
        message.set_location(Location::Resource(self.inner.id.clone()));
        let id = ctx.next_task_id();
        let service = self.inner.service.borrow().clone();
        let body = service.serve(ServiceContext::new(self.clone(), ctx.clone(), id), message.clone());

        let process = ctx.env().process(self.clone().run_task(id, message.clone(), body));
        let mut tasks = self.inner.tasks.borrow_mut();
        tasks.insert(id, Task { message, started: ctx.now(), interrupted: None, process });
        if tasks.len() >= self.inner.capacity {
            self.inner.free.clear();
        }
        Ok(())
    }

    async fn run_task(self, id: u64, message: Message, body: ServiceFuture) {
        let outcome = body.await;
        match &outcome {
            Ok(()) => message.timestamp("resource.serve"),
            Err(interrupt) => message.timestamp(&format!("resource.{}", interrupt.cause)),
        }
        self.finish_task(id);
        // An interrupted message belongs to whoever interrupted it.
        if outcome.is_ok() {
            if message.next().is_empty() {
                message.done();
            } else {
                self.send(message);
            }
        }
    }

    fn finish_task(&self, id: u64) {
        let mut tasks = self.inner.tasks.borrow_mut();
        tasks.shift_remove(&id);
        if tasks.len() < self.inner.capacity {
            self.inner.free.set();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::simulation::Simulation;
    use crate::trace::MemorySink;

    fn sim_with_sink() -> (Simulation, MemorySink) {
        let mut sim = Simulation::new(SimulationConfig::default());
        let sink = MemorySink::new();
        sim.set_log_sink(sink.clone());
        (sim, sink)
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let (mut sim, _) = sim_with_sink();
        assert!(matches!(
            sim.add_resource("res0", 0, None, None),
            Err(SimError::ZeroCapacity(_))
        ));
    }

    #[test]
    fn test_capacity_limits_concurrent_tasks() {
        let (mut sim, sink) = sim_with_sink();
        let source = sim.add_generator("gen0", None).unwrap();
        source.set_random("arrival", [(0.0, Producer::constant(0.0))]).unwrap();
        source.set_limit(Some(3));
        let res = sim.add_resource("res0", 2, None, None).unwrap();
        res.set_random("service", [(0.0, Producer::constant(5.0))]).unwrap();
        sim.add_pipeline(&[(&source).into(), (&res).into()]).unwrap();

        sim.run(Some(1.0)).unwrap();
        assert_eq!(res.task_count(), 2);
        assert!(!res.has_free_capacity());

        sim.run(Some(20.0)).unwrap();
        assert_eq!(res.task_count(), 0);
        let served: Vec<f64> = sink.with_event("resource.serve").iter().map(|t| t.time).collect();
        assert_eq!(served, vec![5.0, 5.0, 10.0]);
    }

    #[test]
    fn test_unknown_task_interrupt_fails() {
        let (mut sim, _) = sim_with_sink();
        let res = sim.add_resource("res0", 1, None, None).unwrap();
        assert!(matches!(res.interrupt_task(99, "x"), Err(SimError::UnknownTask { .. })));
    }
}
