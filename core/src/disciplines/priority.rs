use serde::{Deserialize, Serialize};

use super::{class_key, priority_class};
use crate::error::SimResult;
use crate::message::Message;
use crate::pipe::{PipeCtx, PipePolicy};
use crate::queue::Fifo;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PriorityConfig {
    pub classes: usize,
    pub capacity: Option<f64>,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self { classes: 3, capacity: None }
    }
}

/// Strict priority over `classes` FIFO queues; class 0 is served first.
#[derive(Debug, Clone, Default)]
pub struct PriorityPipe {
    pub config: PriorityConfig,
}

impl PriorityPipe {
    pub fn new(config: PriorityConfig) -> Self {
        Self { config }
    }

    fn classes(&self) -> usize {
        self.config.classes.max(1)
    }
}

impl PipePolicy for PriorityPipe {
    fn kind(&self) -> &str {
        "priority"
    }

    fn install(&self, pipe: &PipeCtx) -> SimResult<()> {
        for class in 0..self.classes() {
            pipe.add_queue(&class_key(class), Box::new(Fifo), self.config.capacity);
        }
        Ok(())
    }

    fn enqueue(&self, pipe: &PipeCtx, message: Message) -> Option<Message> {
        let classes = self.classes();
        let class = priority_class(&message, classes, classes - 1);
        pipe.push(&class_key(class), message)
    }

    fn dequeue(&self, pipe: &PipeCtx) -> Option<Message> {
        (0..self.classes())
            .map(class_key)
            .find(|key| pipe.len(key) > 0.0)
            .and_then(|key| pipe.pop(&key))
    }
}
