use serde::{Deserialize, Serialize};

use crate::error::SimResult;
use crate::message::Message;
use crate::pipe::{PipeCtx, PipePolicy};
use crate::queue::Fifo;

pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FifoConfig {
    pub capacity: Option<f64>,
}

/// Single first-in first-out queue.
#[derive(Debug, Clone, Default)]
pub struct FifoPipe {
    pub config: FifoConfig,
}

impl FifoPipe {
    pub fn new(config: FifoConfig) -> Self {
        Self { config }
    }
}

impl PipePolicy for FifoPipe {
    fn kind(&self) -> &str {
        "fifo"
    }

    fn install(&self, pipe: &PipeCtx) -> SimResult<()> {
        pipe.add_queue(DEFAULT_QUEUE, Box::new(Fifo), self.config.capacity);
        Ok(())
    }

    fn enqueue(&self, pipe: &PipeCtx, message: Message) -> Option<Message> {
        pipe.push(DEFAULT_QUEUE, message)
    }

    fn dequeue(&self, pipe: &PipeCtx) -> Option<Message> {
        pipe.pop(DEFAULT_QUEUE)
    }
}
