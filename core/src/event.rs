use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::ops::{BitAnd, BitOr};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use serde_json::Value;

use crate::engine::{EnvCore, Environment, ProcessKey};
use crate::error::{SimError, SimResult};

/// Value carried by a fired event.
pub type Payload = Value;

/// Exceptional resumption of a process, carrying the interrupt cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interrupt {
    pub cause: String,
}

impl Interrupt {
    pub fn new(cause: impl Into<String>) -> Self {
        Self { cause: cause.into() }
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interrupted: {}", self.cause)
    }
}

impl std::error::Error for Interrupt {}

pub(crate) enum Callback {
    Resume(ProcessKey),
    Notify(Box<dyn FnOnce(&Event)>),
}

enum State {
    Pending,
    Triggered(Payload),
    Processed(Payload),
}

struct EventCell {
    state: State,
    callbacks: Vec<Callback>,
}

/// A future occurrence in simulated time.
///
/// Events go through three states: pending, triggered (scheduled for
/// processing) and processed (continuations have run). Cloning an `Event`
/// clones the handle, not the occurrence.
#[derive(Clone)]
pub struct Event {
    cell: Rc<RefCell<EventCell>>,
    env: Weak<EnvCore>,
}

impl Event {
    pub(crate) fn pending(env: Weak<EnvCore>) -> Self {
        Self {
            cell: Rc::new(RefCell::new(EventCell { state: State::Pending, callbacks: Vec::new() })),
            env,
        }
    }

    pub(crate) fn triggered(env: Weak<EnvCore>, payload: Payload) -> Self {
        Self {
            cell: Rc::new(RefCell::new(EventCell {
                state: State::Triggered(payload),
                callbacks: Vec::new(),
            })),
            env,
        }
    }

    /// A fresh pending event bound to the same environment.
    pub(crate) fn sibling(&self) -> Self {
        Self::pending(self.env.clone())
    }

    pub fn is_triggered(&self) -> bool {
        !matches!(self.cell.borrow().state, State::Pending)
    }

    pub fn is_processed(&self) -> bool {
        matches!(self.cell.borrow().state, State::Processed(_))
    }

    /// The payload, once the event has been triggered.
    pub fn value(&self) -> Option<Payload> {
        match &self.cell.borrow().state {
            State::Pending => None,
            State::Triggered(v) | State::Processed(v) => Some(v.clone()),
        }
    }

    fn processed_value(&self) -> Option<Payload> {
        match &self.cell.borrow().state {
            State::Processed(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Triggers the event; its continuations run when the scheduler reaches
    /// it at the current instant.
    pub fn succeed(&self, payload: Payload) -> SimResult<()> {
        let core = self.env.upgrade().ok_or(SimError::Detached)?;
        {
            let mut cell = self.cell.borrow_mut();
            if !matches!(cell.state, State::Pending) {
                return Err(SimError::EventAlreadyTriggered);
            }
            cell.state = State::Triggered(payload);
        }
        core.schedule_at(core.now(), self.clone());
        Ok(())
    }

    pub(crate) fn add_callback(&self, callback: Callback) {
        self.cell.borrow_mut().callbacks.push(callback);
    }

    /// Marks the event processed and hands back its continuations.
    pub(crate) fn process(&self) -> Vec<Callback> {
        let mut cell = self.cell.borrow_mut();
        let state = std::mem::replace(&mut cell.state, State::Pending);
        cell.state = match state {
            State::Triggered(v) | State::Processed(v) => State::Processed(v),
            State::Pending => State::Processed(Value::Null),
        };
        std::mem::take(&mut cell.callbacks)
    }

    fn downgrade(&self) -> WeakEvent {
        WeakEvent { cell: Rc::downgrade(&self.cell), env: self.env.clone() }
    }

    /// Condition event firing once both `self` and `other` have fired.
    pub fn and(&self, other: &Event) -> Event {
        condition(self.env.clone(), &[self.clone(), other.clone()], true)
    }

    /// Condition event firing as soon as either `self` or `other` fires.
    pub fn or(&self, other: &Event) -> Event {
        condition(self.env.clone(), &[self.clone(), other.clone()], false)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.cell.borrow().state {
            State::Pending => "pending",
            State::Triggered(_) => "triggered",
            State::Processed(_) => "processed",
        };
        f.debug_struct("Event").field("state", &state).finish()
    }
}

impl BitAnd for Event {
    type Output = Event;

    fn bitand(self, rhs: Event) -> Event {
        self.and(&rhs)
    }
}

impl BitOr for Event {
    type Output = Event;

    fn bitor(self, rhs: Event) -> Event {
        self.or(&rhs)
    }
}

impl IntoFuture for Event {
    type Output = Result<Payload, Interrupt>;
    type IntoFuture = EventFuture;

    fn into_future(self) -> EventFuture {
        EventFuture { event: self, registered: false }
    }
}

struct WeakEvent {
    cell: Weak<RefCell<EventCell>>,
    env: Weak<EnvCore>,
}

impl WeakEvent {
    fn upgrade(&self) -> Option<Event> {
        self.cell.upgrade().map(|cell| Event { cell, env: self.env.clone() })
    }
}

/// Builds a conjunction (`all`) or disjunction of `events`.
///
/// The payload is the array of constituent payloads processed at the time
/// the condition fired, in constituent order.
pub(crate) fn condition(env: Weak<EnvCore>, events: &[Event], all: bool) -> Event {
    let cond = Event::pending(env);
    let weak_cond = cond.downgrade();
    let members: Rc<Vec<WeakEvent>> = Rc::new(events.iter().map(Event::downgrade).collect());

    let check: Rc<dyn Fn()> = {
        let members = members.clone();
        Rc::new(move || {
            let Some(cond) = weak_cond.upgrade() else { return };
            if cond.is_triggered() {
                return;
            }
            let fired: Vec<Payload> = members
                .iter()
                .filter_map(|e| e.upgrade().and_then(|e| e.processed_value()))
                .collect();
            let satisfied = if all {
                fired.len() == members.len()
            } else {
                !fired.is_empty() || members.is_empty()
            };
            if satisfied {
                let _ = cond.succeed(Value::Array(fired));
            }
        })
    };

    check();
    if !cond.is_triggered() {
        for event in events.iter().filter(|e| !e.is_processed()) {
            let check = check.clone();
            event.add_callback(Callback::Notify(Box::new(move |_| check())));
        }
    }
    cond
}

/// Future returned by awaiting an [`Event`] inside a process.
///
/// Resolves with the event payload, or with an [`Interrupt`] if the owning
/// process was interrupted while suspended here.
pub struct EventFuture {
    event: Event,
    registered: bool,
}

impl Future for EventFuture {
    type Output = Result<Payload, Interrupt>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(core) = self.event.env.upgrade() else { return Poll::Pending };
        // Events awaited outside a process have no one to resume them.
        let Some(key) = core.current() else { return Poll::Pending };

        if let Some(cause) = core.take_interrupt(key) {
            return Poll::Ready(Err(Interrupt { cause }));
        }
        if let Some(value) = self.event.processed_value() {
            return Poll::Ready(Ok(value));
        }
        if !self.registered {
            self.event.add_callback(Callback::Resume(key));
            self.registered = true;
        }
        Poll::Pending
    }
}

/// Level-triggered flag built on events.
///
/// While set, [`wait`](Signal::wait) returns an already-fired event; clearing
/// swaps in a fresh pending one.
pub struct Signal {
    current: RefCell<Event>,
}

impl Signal {
    pub fn new(env: &Environment, set: bool) -> Self {
        let event = env.event();
        if set {
            let _ = event.succeed(Value::Null);
        }
        Self { current: RefCell::new(event) }
    }

    pub fn is_set(&self) -> bool {
        self.current.borrow().is_triggered()
    }

    pub fn set(&self) {
        let event = self.current.borrow().clone();
        if !event.is_triggered() {
            let _ = event.succeed(Value::Null);
        }
    }

    pub fn clear(&self) {
        let mut current = self.current.borrow_mut();
        if current.is_triggered() {
            *current = current.sibling();
        }
    }

    pub fn wait(&self) -> Event {
        self.current.borrow().clone()
    }
}
