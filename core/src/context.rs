use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::engine::{Environment, SimTime};
use crate::error::{SimError, SimResult};
use crate::random::{seeded_rng, Producer, RandomProcess, SharedRng};
use crate::resource::Resource;
use crate::trace::{FacadeSink, LogSink, Timestamp};

pub(crate) struct ContextInner {
    env: Environment,
    rng: SharedRng,
    resources: RefCell<IndexMap<String, Resource>>,
    sink: RefCell<Box<dyn LogSink>>,
    log_properties: RefCell<Vec<String>>,
    next_uid: Cell<u64>,
    next_task: Cell<u64>,
}

pub(crate) type WeakContext = Weak<ContextInner>;

/// Shared state of one simulation: clock, RNG, resource registry and the
/// log stream. Cheap to clone.
#[derive(Clone)]
pub struct SimContext {
    inner: Rc<ContextInner>,
}

impl SimContext {
    pub(crate) fn new(seed: u64, log_properties: Vec<String>) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                env: Environment::new(),
                rng: seeded_rng(seed),
                resources: RefCell::new(IndexMap::new()),
                sink: RefCell::new(Box::new(FacadeSink)),
                log_properties: RefCell::new(log_properties),
                next_uid: Cell::new(0),
                next_task: Cell::new(0),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &WeakContext) -> SimResult<Self> {
        weak.upgrade().map(|inner| Self { inner }).ok_or(SimError::Detached)
    }

    pub fn env(&self) -> &Environment {
        &self.inner.env
    }

    pub fn now(&self) -> SimTime {
        self.inner.env.now()
    }

    pub fn rng(&self) -> SharedRng {
        self.inner.rng.clone()
    }

    /// Builds a random process drawing from this simulation's RNG.
    pub fn random_process<I>(&self, table: I) -> RandomProcess
    where
        I: IntoIterator<Item = (SimTime, Producer)>,
    {
        RandomProcess::new(table, self.rng())
    }

    pub fn sample(&self, producer: &Producer) -> Option<f64> {
        producer.sample(&mut self.inner.rng.borrow_mut())
    }

    pub fn resource(&self, id: &str) -> SimResult<Resource> {
        self.inner
            .resources
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| SimError::UnknownResource(id.to_string()))
    }

    pub fn has_resource(&self, id: &str) -> bool {
        self.inner.resources.borrow().contains_key(id)
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.inner.resources.borrow().values().cloned().collect()
    }

    pub(crate) fn insert_resource(&self, resource: Resource) -> SimResult<()> {
        let mut resources = self.inner.resources.borrow_mut();
        if resources.contains_key(resource.id()) {
            return Err(SimError::DuplicateResource(resource.id().to_string()));
        }
        resources.insert(resource.id().to_string(), resource);
        Ok(())
    }

    pub(crate) fn next_uid(&self) -> u64 {
        let uid = self.inner.next_uid.get();
        self.inner.next_uid.set(uid + 1);
        uid
    }

    pub(crate) fn next_task_id(&self) -> u64 {
        let id = self.inner.next_task.get();
        self.inner.next_task.set(id + 1);
        id
    }

    pub fn log_properties(&self) -> Vec<String> {
        self.inner.log_properties.borrow().clone()
    }

    pub(crate) fn add_log_property(&self, name: &str) {
        let mut props = self.inner.log_properties.borrow_mut();
        if !props.iter().any(|p| p == name) {
            props.push(name.to_string());
        }
    }

    pub(crate) fn set_sink(&self, sink: Box<dyn LogSink>) {
        *self.inner.sink.borrow_mut() = sink;
    }

    pub(crate) fn record(&self, entry: &Timestamp) {
        self.inner.sink.borrow_mut().record(entry);
    }

    pub(crate) fn flush(&self) {
        self.inner.sink.borrow_mut().flush();
    }
}
