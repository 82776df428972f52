use std::collections::VecDeque;

use crate::engine::{Environment, SimTime};
use crate::event::Signal;
use crate::message::Message;

/// Storage and enable flag of a queue, handed to its discipline.
pub struct QueueState {
    buffer: VecDeque<Message>,
    capacity: f64,
    active: Signal,
}

impl QueueState {
    pub fn messages(&self) -> &VecDeque<Message> {
        &self.buffer
    }

    pub fn messages_mut(&mut self) -> &mut VecDeque<Message> {
        &mut self.buffer
    }

    pub fn head(&self) -> Option<&Message> {
        self.buffer.front()
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn is_active(&self) -> bool {
        self.active.is_set()
    }

    pub fn enable(&self) {
        self.active.set();
    }

    pub fn disable(&self) {
        self.active.clear();
    }
}

/// What a discipline sees during one call: the queue state, the clock and a
/// slot for requesting a later wake-up.
pub struct QueueCx<'a> {
    pub state: &'a mut QueueState,
    now: SimTime,
    wakeup: Option<SimTime>,
}

impl QueueCx<'_> {
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Asks for [`QueueDiscipline::on_wakeup`] to run after `delay`.
    pub fn wake_after(&mut self, delay: SimTime) {
        let delay = delay.max(0.0);
        self.wakeup = Some(self.wakeup.map_or(delay, |d| d.min(delay)));
    }
}

/// Admission and ordering policy of a single queue.
pub trait QueueDiscipline {
    fn kind(&self) -> &str;

    /// Called once when the queue is created.
    fn attach(&mut self, _cx: &mut QueueCx<'_>) {}

    /// Stores `message`, or hands it back when it cannot be admitted.
    fn push(&mut self, cx: &mut QueueCx<'_>, message: Message) -> Result<(), Message>;

    fn pop(&mut self, cx: &mut QueueCx<'_>) -> Option<Message>;

    /// Occupancy as counted against capacity.
    fn len(&self, state: &QueueState) -> f64 {
        state.buffer.len() as f64
    }

    fn can_pop(&mut self, cx: &mut QueueCx<'_>) -> bool {
        !cx.state.buffer.is_empty()
    }

    fn on_wakeup(&mut self, _cx: &mut QueueCx<'_>) {}

    /// Called after a message was taken out of the buffer by a drop.
    fn on_remove(&mut self, cx: &mut QueueCx<'_>) {
        self.on_wakeup(cx);
    }
}

/// First in, first out with a count capacity.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fifo;

impl QueueDiscipline for Fifo {
    fn kind(&self) -> &str {
        "fifo"
    }

    fn push(&mut self, cx: &mut QueueCx<'_>, message: Message) -> Result<(), Message> {
        if (cx.state.buffer.len() as f64) < cx.state.capacity {
            cx.state.buffer.push_back(message);
            Ok(())
        } else {
            Err(message)
        }
    }

    fn pop(&mut self, cx: &mut QueueCx<'_>) -> Option<Message> {
        cx.state.buffer.pop_front()
    }
}

pub struct Queue {
    key: String,
    state: QueueState,
    discipline: Box<dyn QueueDiscipline>,
}

/// Result of a queue operation plus any wake-up delay it requested.
pub(crate) struct Outcome<T> {
    pub value: T,
    pub wakeup: Option<SimTime>,
}

impl Queue {
    pub(crate) fn new(
        env: &Environment,
        key: &str,
        discipline: Box<dyn QueueDiscipline>,
        capacity: Option<f64>,
    ) -> (Self, Option<SimTime>) {
        let mut queue = Self {
            key: key.to_string(),
            state: QueueState {
                buffer: VecDeque::new(),
                capacity: capacity.unwrap_or(f64::INFINITY),
                active: Signal::new(env, true),
            },
            discipline,
        };
        let now = env.now();
        let attached = queue.with(now, |d, cx| d.attach(cx));
        (queue, attached.wakeup)
    }

    fn with<T>(
        &mut self,
        now: SimTime,
        f: impl FnOnce(&mut dyn QueueDiscipline, &mut QueueCx<'_>) -> T,
    ) -> Outcome<T> {
        let mut cx = QueueCx { state: &mut self.state, now, wakeup: None };
        let value = f(self.discipline.as_mut(), &mut cx);
        Outcome { value, wakeup: cx.wakeup }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> &str {
        self.discipline.kind()
    }

    pub fn state(&self) -> &QueueState {
        &self.state
    }

    pub fn len(&self) -> f64 {
        self.discipline.len(&self.state)
    }

    pub fn is_empty(&self) -> bool {
        self.state.buffer.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub(crate) fn set_capacity(&mut self, capacity: f64) {
        self.state.capacity = capacity;
    }

    pub(crate) fn replace_discipline(
        &mut self,
        now: SimTime,
        discipline: Box<dyn QueueDiscipline>,
    ) -> Option<SimTime> {
        self.discipline = discipline;
        self.with(now, |d, cx| d.attach(cx)).wakeup
    }

    pub(crate) fn push(&mut self, now: SimTime, message: Message) -> Outcome<Result<(), Message>> {
        self.with(now, |d, cx| d.push(cx, message))
    }

    pub(crate) fn pop(&mut self, now: SimTime) -> Outcome<Option<Message>> {
        self.with(now, |d, cx| d.pop(cx))
    }

    pub(crate) fn can_pop(&mut self, now: SimTime) -> Outcome<bool> {
        self.with(now, |d, cx| d.can_pop(cx))
    }

    pub(crate) fn wakeup(&mut self, now: SimTime) -> Outcome<()> {
        self.with(now, |d, cx| d.on_wakeup(cx))
    }

    pub(crate) fn remove(&mut self, now: SimTime, message: &Message) -> Outcome<bool> {
        let Some(pos) = self.state.buffer.iter().position(|m| m.ptr_eq(message)) else {
            return Outcome { value: false, wakeup: None };
        };
        self.state.buffer.remove(pos);
        let outcome = self.with(now, |d, cx| d.on_remove(cx));
        Outcome { value: true, wakeup: outcome.wakeup }
    }
}
