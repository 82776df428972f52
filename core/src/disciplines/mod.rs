use crate::message::Message;

pub mod fifo;
pub mod preemption;
pub mod priority;
pub mod round_robin;
pub mod wfq;

pub use fifo::{FifoConfig, FifoPipe};
pub use preemption::{PreemptionConfig, PreemptionMode, PreemptivePipe};
pub use priority::{PriorityConfig, PriorityPipe};
pub use round_robin::{RoundRobinConfig, RoundRobinPipe};
pub use wfq::{TokenBucket, TokenBucketConfig, WfqConfig, WfqPipe};

pub(crate) fn class_key(class: usize) -> String {
    class.to_string()
}

/// Class index from the `priority` property; missing or out-of-range values
/// map to `fallback`.
pub(crate) fn priority_class(message: &Message, classes: usize, fallback: usize) -> usize {
    match message.property_i64("priority") {
        Some(p) if p >= 0 && (p as usize) < classes => p as usize,
        _ => fallback,
    }
}
