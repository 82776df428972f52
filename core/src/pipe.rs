use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::context::SimContext;
use crate::engine::{Environment, SimTime};
use crate::error::{SimError, SimResult};
use crate::event::{Callback, Signal};
use crate::message::{Location, Message};
use crate::queue::{Queue, QueueDiscipline};
use crate::resource::{Resource, TaskInfo};

/// Dispatch policy of a pipe: which queues exist, where arrivals go and
/// which message is served next.
pub trait PipePolicy {
    fn kind(&self) -> &str;

    /// Creates the policy's queues.
    fn install(&self, pipe: &PipeCtx) -> SimResult<()>;

    /// Routes an arriving message into a queue. Returns the message if it
    /// was admitted.
    fn enqueue(&self, pipe: &PipeCtx, message: Message) -> Option<Message>;

    /// Picks the next message to serve.
    fn dequeue(&self, pipe: &PipeCtx) -> Option<Message>;
}

pub(crate) struct PipeState {
    queues: RefCell<IndexMap<String, Queue>>,
    available: Signal,
    policy: Rc<dyn PipePolicy>,
}

impl PipeState {
    pub(crate) fn new(env: &Environment, policy: Rc<dyn PipePolicy>) -> Self {
        Self { queues: RefCell::new(IndexMap::new()), available: Signal::new(env, false), policy }
    }
}

/// Handle through which policies (and the resource) operate on a pipe.
///
/// Every operation keeps the `available` flag in step with queue occupancy
/// and records `pipe.in` / `pipe.out`.
#[derive(Clone)]
pub struct PipeCtx {
    resource: Resource,
}

impl PipeCtx {
    pub(crate) fn new(resource: Resource) -> Self {
        Self { resource }
    }

    fn state(&self) -> &PipeState {
        self.resource.pipe_state()
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn policy(&self) -> Rc<dyn PipePolicy> {
        self.state().policy.clone()
    }

    pub fn now(&self) -> SimTime {
        self.resource.context().map(|c| c.now()).unwrap_or(0.0)
    }

    pub fn is_available(&self) -> bool {
        self.state().available.is_set()
    }

    pub fn add_queue(&self, key: &str, discipline: Box<dyn QueueDiscipline>, capacity: Option<f64>) {
        let Ok(ctx) = self.resource.context() else { return };
        let (queue, wakeup) = Queue::new(ctx.env(), key, discipline, capacity);
        self.state().queues.borrow_mut().insert(key.to_string(), queue);
        self.schedule_wakeup(key, wakeup);
    }

    pub(crate) fn replace_discipline(&self, key: &str, discipline: Box<dyn QueueDiscipline>) -> SimResult<()> {
        let now = self.now();
        let wakeup = {
            let mut queues = self.state().queues.borrow_mut();
            let queue = queues.get_mut(key).ok_or_else(|| self.unknown_queue(key))?;
            queue.replace_discipline(now, discipline)
        };
        self.schedule_wakeup(key, wakeup);
        self.full();
        Ok(())
    }

    pub(crate) fn set_capacity(&self, key: &str, capacity: f64) -> SimResult<()> {
        let mut queues = self.state().queues.borrow_mut();
        let queue = queues.get_mut(key).ok_or_else(|| self.unknown_queue(key))?;
        queue.set_capacity(capacity);
        Ok(())
    }

    fn unknown_queue(&self, key: &str) -> SimError {
        SimError::InvalidPipeline(format!("resource '{}' has no queue '{key}'", self.resource.id()))
    }

    pub fn queue_keys(&self) -> Vec<String> {
        self.state().queues.borrow().keys().cloned().collect()
    }

    pub fn has_queue(&self, key: &str) -> bool {
        self.state().queues.borrow().contains_key(key)
    }

    /// Occupancy of queue `key` as its discipline counts it.
    pub fn len(&self, key: &str) -> f64 {
        self.state().queues.borrow().get(key).map_or(0.0, Queue::len)
    }

    /// Number of messages waiting across all queues.
    pub fn waiting(&self) -> usize {
        self.state().queues.borrow().values().map(|q| q.state().messages().len()).sum()
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.state().queues.borrow().get(key).is_some_and(Queue::is_active)
    }

    pub fn head(&self, key: &str) -> Option<Message> {
        self.state().queues.borrow().get(key)?.state().head().cloned()
    }

    pub fn can_pop(&self, key: &str) -> bool {
        let now = self.now();
        let outcome = {
            let mut queues = self.state().queues.borrow_mut();
            let Some(queue) = queues.get_mut(key) else { return false };
            queue.can_pop(now)
        };
        self.schedule_wakeup(key, outcome.wakeup);
        outcome.value
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.resource.tasks()
    }

    pub fn interrupt(&self, task: u64, cause: &str) -> SimResult<()> {
        self.resource.interrupt_task(task, cause)
    }

    /// Pipe entry: records the arrival at this resource, derives the next
    /// hops and hands the message to the policy.
    pub(crate) fn enqueue(&self, message: Message) -> Option<Message> {
        let id = self.resource.id().to_string();
        message.set_location(Location::Pipe(id.clone()));
        message.set_resource(&id);
        let admitted = self.policy().enqueue(self, message);
        self.full();
        admitted
    }

    /// Stores `message` in queue `key`. A rejected message is dropped with
    /// cause `full`.
    pub fn push(&self, key: &str, message: Message) -> Option<Message> {
        message.set_location(Location::Queue {
            resource: self.resource.id().to_string(),
            queue: key.to_string(),
        });
        let now = self.now();
        let outcome = {
            let mut queues = self.state().queues.borrow_mut();
            queues.get_mut(key).map(|q| q.push(now, message.clone()))
        };
        let Some(outcome) = outcome else {
            log::error!("{}", self.unknown_queue(key));
            let _ = message.drop("misrouted");
            return None;
        };
        self.schedule_wakeup(key, outcome.wakeup);
        match outcome.value {
            Ok(()) => {
                message.timestamp("pipe.in");
                self.full();
                Some(message)
            }
            Err(rejected) => {
                if let Err(err) = rejected.drop("full") {
                    log::warn!("dropping rejected message: {err}");
                }
                None
            }
        }
    }

    pub fn pop(&self, key: &str) -> Option<Message> {
        let now = self.now();
        let outcome = {
            let mut queues = self.state().queues.borrow_mut();
            queues.get_mut(key)?.pop(now)
        };
        self.schedule_wakeup(key, outcome.wakeup);
        let message = outcome.value?;
        message.timestamp("pipe.out");
        Some(message)
    }

    pub(crate) fn remove(&self, key: &str, message: &Message) {
        let now = self.now();
        let outcome = {
            let mut queues = self.state().queues.borrow_mut();
            match queues.get_mut(key) {
                Some(queue) => queue.remove(now, message),
                None => return,
            }
        };
        self.schedule_wakeup(key, outcome.wakeup);
        self.full();
    }

    pub(crate) fn wakeup(&self, key: &str) {
        let now = self.now();
        let outcome = {
            let mut queues = self.state().queues.borrow_mut();
            match queues.get_mut(key) {
                Some(queue) => queue.wakeup(now),
                None => return,
            }
        };
        self.schedule_wakeup(key, outcome.wakeup);
        self.full();
    }

    /// Raises `available` when some active queue holds messages.
    pub fn full(&self) {
        let ready = self
            .state()
            .queues
            .borrow()
            .values()
            .any(|q| q.is_active() && q.len() > 0.0);
        if ready {
            self.state().available.set();
        }
    }

    fn schedule_wakeup(&self, key: &str, delay: Option<SimTime>) {
        let Some(delay) = delay else { return };
        let Ok(ctx) = self.resource.context() else { return };
        let timer = ctx.env().timeout(delay);
        let weak = ctx.downgrade();
        let resource = self.resource.id().to_string();
        let key = key.to_string();
        timer.add_callback(Callback::Notify(Box::new(move |_| {
            if let Ok(target) = SimContext::upgrade(&weak).and_then(|c| c.resource(&resource)) {
                target.pipe().wakeup(&key);
            }
        })));
    }
}

/// Serves messages while the resource has a free slot and the pipe has an
/// available message.
pub(crate) async fn wait_loop(resource: Resource) {
    let pipe = resource.pipe();
    loop {
        let ready = resource.free_event().and(&pipe.state().available.wait());
        if ready.await.is_err() {
            continue;
        }
        pipe.state().available.clear();
        let Some(message) = pipe.policy().dequeue(&pipe) else {
            continue;
        };
        if let Err(err) = resource.serve(message) {
            log::error!("{}: cannot start service: {err}", resource.id());
            return;
        }
        pipe.full();
    }
}
