use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;
use futures::task::noop_waker;
use futures::FutureExt;
use serde_json::Value;
use slab::Slab;

use crate::error::{SimError, SimResult};
use crate::event::{condition, Callback, Event, Payload};

/// Simulated time. Unitless and non-decreasing.
pub type SimTime = f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ProcessKey {
    index: usize,
    serial: u64,
}

struct ProcessSlot {
    serial: u64,
    future: Option<LocalBoxFuture<'static, ()>>,
    interrupts: VecDeque<String>,
    done: Event,
}

struct Scheduled {
    time: SimTime,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.total_cmp(&other.time).then(self.seq.cmp(&other.seq))
    }
}

pub(crate) struct EnvCore {
    now: Cell<SimTime>,
    seq: Cell<u64>,
    processed: Cell<u64>,
    serial: Cell<u64>,
    events: RefCell<BinaryHeap<Reverse<Scheduled>>>,
    processes: RefCell<Slab<ProcessSlot>>,
    current: Cell<Option<ProcessKey>>,
}

impl EnvCore {
    pub(crate) fn now(&self) -> SimTime {
        self.now.get()
    }

    pub(crate) fn schedule_at(&self, time: SimTime, event: Event) {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        self.events.borrow_mut().push(Reverse(Scheduled { time, seq, event }));
    }

    pub(crate) fn current(&self) -> Option<ProcessKey> {
        self.current.get()
    }

    pub(crate) fn take_interrupt(&self, key: ProcessKey) -> Option<String> {
        let mut processes = self.processes.borrow_mut();
        match processes.get_mut(key.index) {
            Some(slot) if slot.serial == key.serial => slot.interrupts.pop_front(),
            _ => None,
        }
    }
}

/// Handle to a running (or finished) process.
#[derive(Debug, Clone)]
pub struct Process {
    key: ProcessKey,
    done: Event,
}

impl Process {
    pub fn id(&self) -> u64 {
        self.key.serial
    }

    pub fn is_alive(&self) -> bool {
        !self.done.is_triggered()
    }

    /// Event fired when the process body returns.
    pub fn completion(&self) -> Event {
        self.done.clone()
    }
}

/// The scheduler: a clock, a time-ordered event queue and the set of live
/// processes.
///
/// Events scheduled for the same instant are processed in the order they
/// were scheduled.
#[derive(Clone)]
pub struct Environment {
    core: Rc<EnvCore>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            core: Rc::new(EnvCore {
                now: Cell::new(0.0),
                seq: Cell::new(0),
                processed: Cell::new(0),
                serial: Cell::new(0),
                events: RefCell::new(BinaryHeap::new()),
                processes: RefCell::new(Slab::new()),
                current: Cell::new(None),
            }),
        }
    }

    pub fn now(&self) -> SimTime {
        self.core.now()
    }

    /// Number of events processed so far.
    pub fn processed_events(&self) -> u64 {
        self.core.processed.get()
    }

    /// A pending event, fired later with [`Event::succeed`].
    pub fn event(&self) -> Event {
        Event::pending(Rc::downgrade(&self.core))
    }

    /// An event firing `delay` time units from now.
    ///
    /// An infinite delay yields an event that never fires.
    ///
    /// # Panics
    ///
    /// Panics if `delay` is negative or NaN; use [`try_timeout`](Self::try_timeout)
    /// for delays coming from untrusted input.
    pub fn timeout(&self, delay: SimTime) -> Event {
        self.timeout_with(delay, Value::Null)
    }

    pub fn timeout_with(&self, delay: SimTime, payload: Payload) -> Event {
        match self.try_timeout(delay, payload) {
            Ok(event) => event,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_timeout(&self, delay: SimTime, payload: Payload) -> SimResult<Event> {
        if delay.is_nan() || delay < 0.0 {
            return Err(SimError::NegativeDelay(delay));
        }
        if delay.is_infinite() {
            return Ok(self.event());
        }
        let event = Event::triggered(Rc::downgrade(&self.core), payload);
        self.core.schedule_at(self.now() + delay, event.clone());
        Ok(event)
    }

    pub fn all_of(&self, events: &[Event]) -> Event {
        condition(Rc::downgrade(&self.core), events, true)
    }

    pub fn any_of(&self, events: &[Event]) -> Event {
        condition(Rc::downgrade(&self.core), events, false)
    }

    /// Registers `body` as a process. It starts running at the current
    /// instant, after the events already scheduled for it.
    pub fn process<F>(&self, body: F) -> Process
    where
        F: Future<Output = ()> + 'static,
    {
        let serial = self.core.serial.get() + 1;
        self.core.serial.set(serial);
        let done = self.event();
        let index = self.core.processes.borrow_mut().insert(ProcessSlot {
            serial,
            future: Some(body.boxed_local()),
            interrupts: VecDeque::new(),
            done: done.clone(),
        });
        let key = ProcessKey { index, serial };

        let init = self.event();
        init.add_callback(Callback::Resume(key));
        let _ = init.succeed(Value::Null);
        Process { key, done }
    }

    /// Resumes `process` with an [`Interrupt`](crate::event::Interrupt)
    /// carrying `cause` at the current instant.
    pub fn interrupt(&self, process: &Process, cause: &str) -> SimResult<()> {
        if !process.is_alive() {
            return Err(SimError::ProcessFinished(process.id()));
        }
        {
            let mut processes = self.core.processes.borrow_mut();
            match processes.get_mut(process.key.index) {
                Some(slot) if slot.serial == process.key.serial => {
                    slot.interrupts.push_back(cause.to_string())
                }
                _ => return Err(SimError::ProcessFinished(process.id())),
            }
        }
        let wakeup = self.event();
        wakeup.add_callback(Callback::Resume(process.key));
        wakeup.succeed(Value::Null)
    }

    /// Time of the next scheduled event, if any.
    pub fn peek(&self) -> Option<SimTime> {
        self.core.events.borrow().peek().map(|Reverse(s)| s.time)
    }

    /// Processes the next event. Returns `false` once the queue is empty.
    pub fn step(&self) -> bool {
        let next = self.core.events.borrow_mut().pop();
        let Some(Reverse(scheduled)) = next else {
            return false;
        };
        self.core.now.set(scheduled.time);
        self.core.processed.set(self.core.processed.get() + 1);

        for callback in scheduled.event.process() {
            match callback {
                Callback::Resume(key) => self.resume(key),
                Callback::Notify(notify) => notify(&scheduled.event),
            }
        }
        true
    }

    /// Runs until the queue drains, or until the clock would reach `until`.
    ///
    /// Events at exactly `until` are left unprocessed and the clock ends at
    /// `until`.
    pub fn run(&self, until: Option<SimTime>) {
        while let Some(time) = self.peek() {
            if until.is_some_and(|limit| time >= limit) {
                break;
            }
            self.step();
        }
        if let Some(limit) = until {
            if limit > self.now() {
                self.core.now.set(limit);
            }
        }
    }

    /// Runs until `event` has been processed or the queue drains.
    pub fn run_until(&self, event: &Event) {
        while !event.is_processed() && self.step() {}
    }

    fn resume(&self, key: ProcessKey) {
        let taken = {
            let mut processes = self.core.processes.borrow_mut();
            match processes.get_mut(key.index) {
                Some(slot) if slot.serial == key.serial => slot.future.take(),
                _ => None,
            }
        };
        // Stale wakeup for a finished process.
        let Some(mut future) = taken else { return };

        let previous = self.core.current.replace(Some(key));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let poll = future.as_mut().poll(&mut cx);
        self.core.current.set(previous);

        match poll {
            Poll::Pending => {
                if let Some(slot) = self.core.processes.borrow_mut().get_mut(key.index) {
                    slot.future = Some(future);
                }
            }
            Poll::Ready(()) => {
                drop(future);
                let slot = self.core.processes.borrow_mut().remove(key.index);
                let _ = slot.done.succeed(Value::Null);
            }
        }
    }

    /// Drops every pending event and process body.
    ///
    /// Process bodies usually hold handles back to the environment; this
    /// releases those cycles when a simulation is torn down.
    pub fn shutdown(&self) {
        let bodies: Vec<_> = {
            let mut processes = self.core.processes.borrow_mut();
            processes.drain().filter_map(|slot| slot.future).collect()
        };
        drop(bodies);
        let events = std::mem::take(&mut *self.core.events.borrow_mut());
        drop(events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Interrupt;
    use serde_json::json;
    use std::cell::RefCell;

    #[test]
    fn test_same_time_events_keep_schedule_order() {
        let env = Environment::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let e = env.timeout(1.0);
            let order = order.clone();
            e.add_callback(Callback::Notify(Box::new(move |_| order.borrow_mut().push(tag))));
        }
        env.run(None);
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
        assert_eq!(env.now(), 1.0);
    }

    #[test]
    fn test_run_until_stops_before_limit() {
        let env = Environment::new();
        let early = env.timeout(4.0);
        let at_limit = env.timeout(5.0);
        env.run(Some(5.0));
        assert!(early.is_processed());
        assert!(!at_limit.is_processed());
        assert_eq!(env.now(), 5.0);
        assert_eq!(env.peek(), Some(5.0));
    }

    #[test]
    fn test_infinite_timeout_never_fires() {
        let env = Environment::new();
        let e = env.timeout(f64::INFINITY);
        env.run(None);
        assert!(!e.is_triggered());
        assert!(env.peek().is_none());
    }

    #[test]
    fn test_negative_delay_is_rejected() {
        let env = Environment::new();
        assert!(matches!(
            env.try_timeout(-1.0, Value::Null),
            Err(SimError::NegativeDelay(_))
        ));
    }

    #[test]
    #[should_panic]
    fn test_negative_timeout_panics() {
        let env = Environment::new();
        env.timeout(-0.5);
    }

    #[test]
    fn test_process_sees_timeout_payload() {
        let env = Environment::new();
        let got = Rc::new(RefCell::new(Value::Null));
        {
            let env2 = env.clone();
            let got = got.clone();
            env.process(async move {
                let v = env2.timeout_with(2.5, json!(7)).await.unwrap();
                *got.borrow_mut() = v;
            });
        }
        env.run(None);
        assert_eq!(*got.borrow(), json!(7));
        assert_eq!(env.now(), 2.5);
    }

    #[test]
    fn test_interrupt_delivers_cause() {
        let env = Environment::new();
        let outcome = Rc::new(RefCell::new(None));
        let worker = {
            let env2 = env.clone();
            let outcome = outcome.clone();
            env.process(async move {
                let r = env2.timeout(10.0).await;
                *outcome.borrow_mut() = Some((env2.now(), r));
            })
        };
        {
            let env2 = env.clone();
            let worker = worker.clone();
            env.process(async move {
                env2.timeout(3.0).await.unwrap();
                env2.interrupt(&worker, "preempted").unwrap();
            });
        }
        env.run(None);
        let outcome = outcome.borrow().clone().unwrap();
        assert_eq!(outcome.0, 3.0);
        assert_eq!(outcome.1, Err(Interrupt::new("preempted")));
        assert!(!worker.is_alive());
    }

    #[test]
    fn test_interrupting_finished_process_fails() {
        let env = Environment::new();
        let p = env.process(async {});
        env.run(None);
        assert!(!p.is_alive());
        assert!(matches!(env.interrupt(&p, "late"), Err(SimError::ProcessFinished(_))));
    }

    #[test]
    fn test_completion_event_fires() {
        let env = Environment::new();
        let p = {
            let env2 = env.clone();
            env.process(async move {
                env2.timeout(1.0).await.unwrap();
            })
        };
        let done = p.completion();
        env.run_until(&done);
        assert!(done.is_processed());
        assert_eq!(env.now(), 1.0);
    }
}
