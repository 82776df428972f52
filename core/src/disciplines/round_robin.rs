use std::cell::Cell;

use serde::{Deserialize, Serialize};

use super::{class_key, priority_class};
use crate::error::SimResult;
use crate::message::Message;
use crate::pipe::{PipeCtx, PipePolicy};
use crate::queue::Fifo;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoundRobinConfig {
    pub queues: usize,
    pub capacity: Option<f64>,
}

impl Default for RoundRobinConfig {
    fn default() -> Self {
        Self { queues: 4, capacity: None }
    }
}

/// Cycles over `queues` FIFO queues, serving the next non-empty one after
/// the last served.
#[derive(Debug, Clone, Default)]
pub struct RoundRobinPipe {
    pub config: RoundRobinConfig,
    last: Cell<Option<usize>>,
}

impl RoundRobinPipe {
    pub fn new(config: RoundRobinConfig) -> Self {
        Self { config, last: Cell::new(None) }
    }

    fn queues(&self) -> usize {
        self.config.queues.max(1)
    }
}

impl PipePolicy for RoundRobinPipe {
    fn kind(&self) -> &str {
        "round_robin"
    }

    fn install(&self, pipe: &PipeCtx) -> SimResult<()> {
        for queue in 0..self.queues() {
            pipe.add_queue(&class_key(queue), Box::new(Fifo), self.config.capacity);
        }
        Ok(())
    }

    fn enqueue(&self, pipe: &PipeCtx, message: Message) -> Option<Message> {
        let queue = priority_class(&message, self.queues(), 0);
        pipe.push(&class_key(queue), message)
    }

    fn dequeue(&self, pipe: &PipeCtx) -> Option<Message> {
        let n = self.queues();
        // The pointer starts on the last queue so queue 0 is tried first.
        let mut pointer = self.last.get().unwrap_or(n - 1);
        for _ in 0..n {
            pointer = (pointer + 1) % n;
            let key = class_key(pointer);
            if pipe.len(&key) > 0.0 {
                self.last.set(Some(pointer));
                return pipe.pop(&key);
            }
        }
        None
    }
}
