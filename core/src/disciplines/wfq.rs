use serde::{Deserialize, Serialize};

use super::{class_key, priority_class};
use crate::engine::SimTime;
use crate::error::SimResult;
use crate::message::Message;
use crate::pipe::{PipeCtx, PipePolicy};
use crate::queue::{QueueCx, QueueDiscipline, QueueState};

const EPSILON: f64 = 1e-9;

fn size_of(message: &Message) -> f64 {
    message.property_f64("size").unwrap_or(1.0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TokenBucketConfig {
    pub rate: f64,
    pub capacity: f64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self { rate: 1.0, capacity: 1.0 }
    }
}

/// Rate-shaped queue: a message leaves only when the bucket holds at least
/// its `size` in tokens.
///
/// Occupancy is the summed size of the waiting messages. The queue is
/// enabled exactly while its head is affordable; when it is not, a wake-up
/// is requested for the moment the shortfall will have accrued.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    level: f64,
    last: SimTime,
    armed: Option<SimTime>,
}

impl TokenBucket {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self { rate, capacity, level: capacity, last: 0.0, armed: None }
    }

    pub fn from_config(config: TokenBucketConfig) -> Self {
        Self::new(config.rate, config.capacity)
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    fn refill(&mut self, now: SimTime) {
        let elapsed = now - self.last;
        if elapsed > 0.0 && self.rate > 0.0 {
            self.level = (self.level + self.rate * elapsed).min(self.capacity);
        }
        self.last = self.last.max(now);
    }

    fn affordable(&self, message: &Message) -> bool {
        size_of(message) <= self.level + EPSILON
    }

    fn rearm(&mut self, cx: &mut QueueCx<'_>) {
        let now = cx.now();
        self.refill(now);
        let Some(need) = cx.state.head().map(size_of) else {
            cx.state.disable();
            return;
        };
        if need <= self.level + EPSILON {
            cx.state.enable();
            return;
        }
        cx.state.disable();
        if self.rate > 0.0 && need <= self.capacity {
            let due = now + (need - self.level) / self.rate;
            if self.armed.map_or(true, |at| due < at) {
                self.armed = Some(due);
                cx.wake_after(due - now);
            }
        }
    }
}

impl QueueDiscipline for TokenBucket {
    fn kind(&self) -> &str {
        "token_bucket"
    }

    fn attach(&mut self, cx: &mut QueueCx<'_>) {
        self.last = cx.now();
        self.rearm(cx);
    }

    fn push(&mut self, cx: &mut QueueCx<'_>, message: Message) -> Result<(), Message> {
        let limit = self.capacity.min(cx.state.capacity());
        if self.len(cx.state) + size_of(&message) > limit {
            return Err(message);
        }
        cx.state.messages_mut().push_back(message);
        self.rearm(cx);
        Ok(())
    }

    fn pop(&mut self, cx: &mut QueueCx<'_>) -> Option<Message> {
        self.refill(cx.now());
        let popped = match cx.state.head() {
            Some(head) if self.affordable(head) => cx.state.messages_mut().pop_front(),
            _ => None,
        };
        if let Some(message) = &popped {
            self.level = (self.level - size_of(message)).max(0.0);
        }
        self.rearm(cx);
        popped
    }

    fn len(&self, state: &QueueState) -> f64 {
        state.messages().iter().map(size_of).sum()
    }

    fn can_pop(&mut self, cx: &mut QueueCx<'_>) -> bool {
        self.refill(cx.now());
        cx.state.head().is_some_and(|head| self.affordable(head))
    }

    fn on_wakeup(&mut self, cx: &mut QueueCx<'_>) {
        if self.armed.is_some_and(|at| at <= cx.now() + EPSILON) {
            self.armed = None;
        }
        self.rearm(cx);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WfqConfig {
    /// Total tokens per time unit shared by the classes.
    pub rate: f64,
    pub classes: usize,
}

impl Default for WfqConfig {
    fn default() -> Self {
        Self { rate: 10.0, classes: 1 }
    }
}

/// Weighted fair queueing over token buckets.
///
/// Class `i` of `N` gets `floor(rate * (i + 1) / (N * (N + 1) / 2))` tokens
/// per time unit, which is also its bucket capacity. Dequeue serves the
/// smallest head among the buckets that can currently afford theirs.
#[derive(Debug, Clone, Default)]
pub struct WfqPipe {
    pub config: WfqConfig,
}

impl WfqPipe {
    pub fn new(config: WfqConfig) -> Self {
        Self { config }
    }

    fn classes(&self) -> usize {
        self.config.classes.max(1)
    }

    pub fn class_rate(&self, class: usize) -> f64 {
        let n = self.classes() as f64;
        let share = n * (n + 1.0) / 2.0;
        (self.config.rate * (class + 1) as f64 / share).floor()
    }
}

impl PipePolicy for WfqPipe {
    fn kind(&self) -> &str {
        "wfq"
    }

    fn install(&self, pipe: &PipeCtx) -> SimResult<()> {
        for class in 0..self.classes() {
            let rate = self.class_rate(class);
            pipe.add_queue(&class_key(class), Box::new(TokenBucket::new(rate, rate)), Some(rate));
        }
        Ok(())
    }

    fn enqueue(&self, pipe: &PipeCtx, message: Message) -> Option<Message> {
        if !message.has_property("priority") {
            message.set_property("priority", 0i64);
        }
        if !message.has_property("size") {
            message.set_property("size", 1.0);
        }
        let class = priority_class(&message, self.classes(), 0);
        pipe.push(&class_key(class), message)
    }

    fn dequeue(&self, pipe: &PipeCtx) -> Option<Message> {
        let mut best: Option<(String, f64)> = None;
        for key in pipe.queue_keys() {
            if !pipe.is_active(&key) || !pipe.can_pop(&key) {
                continue;
            }
            let Some(size) = pipe.head(&key).map(|m| size_of(&m)) else { continue };
            if best.as_ref().map_or(true, |(_, smallest)| size < *smallest) {
                best = Some((key, size));
            }
        }
        let (key, _) = best?;
        pipe.pop(&key)
    }
}
