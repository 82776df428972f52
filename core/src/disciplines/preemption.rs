use serde::{Deserialize, Serialize};

use super::{class_key, priority_class};
use crate::error::SimResult;
use crate::message::Message;
use crate::pipe::{PipeCtx, PipePolicy};
use crate::queue::{Fifo, QueueCx, QueueDiscipline};
use crate::resource::TaskInfo;

pub const PREEMPTED_QUEUE: &str = "preempted";

/// What happens to the remaining service time of a preempted message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PreemptionMode {
    /// Continue where it left off: the elapsed segment is subtracted from
    /// the `wait` property.
    Resume,
    /// Start over: `wait` is cleared and drawn again.
    Restart,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreemptionConfig {
    pub classes: usize,
    pub mode: PreemptionMode,
    pub capacity: Option<f64>,
}

impl Default for PreemptionConfig {
    fn default() -> Self {
        Self { classes: 3, mode: PreemptionMode::Resume, capacity: None }
    }
}

/// Holds evicted messages ordered by class. A message goes in front of
/// every message of its own or a worse class.
#[derive(Debug, Clone, Copy)]
pub struct PreemptedQueue {
    classes: usize,
}

impl PreemptedQueue {
    pub fn new(classes: usize) -> Self {
        Self { classes: classes.max(1) }
    }

    fn class_of(&self, message: &Message) -> usize {
        priority_class(message, self.classes, self.classes - 1)
    }
}

impl QueueDiscipline for PreemptedQueue {
    fn kind(&self) -> &str {
        "preempted"
    }

    fn push(&mut self, cx: &mut QueueCx<'_>, message: Message) -> Result<(), Message> {
        let buffer = cx.state.messages();
        if (buffer.len() as f64) >= cx.state.capacity() {
            return Err(message);
        }
        let class = self.class_of(&message);
        let at = buffer.iter().position(|m| self.class_of(m) >= class).unwrap_or(buffer.len());
        cx.state.messages_mut().insert(at, message);
        Ok(())
    }

    fn pop(&mut self, cx: &mut QueueCx<'_>) -> Option<Message> {
        cx.state.messages_mut().pop_front()
    }
}

/// Strict priority where an arrival may evict a lower-class message from
/// service.
///
/// The victim is the running task with the lowest class (first started on
/// ties) that has not already been interrupted, provided that class is
/// strictly lower than the arrival's. Free slots do not prevent eviction.
/// Evicted messages wait in the `preempted` queue, which is served right
/// after class 0.
#[derive(Debug, Clone, Default)]
pub struct PreemptivePipe {
    pub config: PreemptionConfig,
}

impl PreemptivePipe {
    pub fn new(config: PreemptionConfig) -> Self {
        Self { config }
    }

    fn classes(&self) -> usize {
        self.config.classes.max(1)
    }

    fn class_of(&self, message: &Message) -> usize {
        let classes = self.classes();
        priority_class(message, classes, classes - 1)
    }

    fn victim(&self, pipe: &PipeCtx, class: usize) -> Option<TaskInfo> {
        let mut victim: Option<(usize, TaskInfo)> = None;
        for task in pipe.tasks().into_iter().filter(|t| t.interrupted.is_none()) {
            let running = self.class_of(&task.message);
            if running > class && victim.as_ref().map_or(true, |(worst, _)| running > *worst) {
                victim = Some((running, task));
            }
        }
        victim.map(|(_, task)| task)
    }

    fn preempt(&self, pipe: &PipeCtx, class: usize) {
        let Some(task) = self.victim(pipe, class) else { return };
        if let Err(err) = pipe.interrupt(task.id, "preempted") {
            log::warn!("{}: preempting task {}: {err}", pipe.resource().id(), task.id);
            return;
        }
        let message = task.message;
        match self.config.mode {
            PreemptionMode::Resume => {
                if let Some(wait) = message.property_f64("wait") {
                    let elapsed = pipe.now() - task.started;
                    message.set_property("wait", (wait - elapsed).max(0.0));
                }
            }
            PreemptionMode::Restart => {
                message.remove_property("wait");
            }
        }
        let count = message.property_i64("preemptions").unwrap_or(0);
        message.set_property("preemptions", count + 1);
        pipe.push(PREEMPTED_QUEUE, message);
    }
}

impl PipePolicy for PreemptivePipe {
    fn kind(&self) -> &str {
        "preemption"
    }

    fn install(&self, pipe: &PipeCtx) -> SimResult<()> {
        pipe.add_queue(PREEMPTED_QUEUE, Box::new(PreemptedQueue::new(self.classes())), None);
        for class in 0..self.classes() {
            pipe.add_queue(&class_key(class), Box::new(Fifo), self.config.capacity);
        }
        Ok(())
    }

    fn enqueue(&self, pipe: &PipeCtx, message: Message) -> Option<Message> {
        let class = self.class_of(&message);
        let admitted = pipe.push(&class_key(class), message)?;
        self.preempt(pipe, class);
        Some(admitted)
    }

    fn dequeue(&self, pipe: &PipeCtx) -> Option<Message> {
        let mut order = vec![class_key(0), PREEMPTED_QUEUE.to_string()];
        order.extend((1..self.classes()).map(class_key));
        order.into_iter().find(|key| pipe.len(key) > 0.0).and_then(|key| pipe.pop(&key))
    }
}
