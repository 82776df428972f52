use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::SimTime;

pub const CSV_HEADER: [&str; 5] = ["timestamp", "message", "seq_num", "resource", "event"];

/// One lifecycle record of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamp {
    pub time: SimTime,
    pub message: String,
    pub seq_num: u64,
    pub resource: String,
    pub event: String,
    /// Allow-listed property values, `"NA"` where the message lacks one.
    pub properties: Vec<(String, Value)>,
}

impl Timestamp {
    pub fn header(properties: &[String]) -> String {
        CSV_HEADER
            .iter()
            .map(|s| s.to_string())
            .chain(properties.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn to_csv(&self) -> String {
        let mut line = format!(
            "{:.9},{},{},{},{}",
            self.time, self.message, self.seq_num, self.resource, self.event
        );
        for (_, value) in &self.properties {
            line.push(',');
            match value {
                Value::String(s) => line.push_str(s),
                other => line.push_str(&other.to_string()),
            }
        }
        line
    }
}

/// Destination for the message lifecycle stream.
pub trait LogSink {
    fn record(&mut self, entry: &Timestamp);

    fn flush(&mut self) {}
}

/// Forwards records to the `log` facade under the `queuesim::trace` target.
#[derive(Debug, Default)]
pub struct FacadeSink;

impl LogSink for FacadeSink {
    fn record(&mut self, entry: &Timestamp) {
        log::info!(target: "queuesim::trace", "{}", entry.to_csv());
    }
}

/// Keeps records in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: Rc<RefCell<Vec<Timestamp>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Timestamp> {
        self.entries.borrow().clone()
    }

    pub fn with_event(&self, event: &str) -> Vec<Timestamp> {
        self.entries.borrow().iter().filter(|t| t.event == event).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl LogSink for MemorySink {
    fn record(&mut self, entry: &Timestamp) {
        self.entries.borrow_mut().push(entry.clone());
    }
}

/// Fans each record out to several sinks.
#[derive(Default)]
pub struct Tee {
    sinks: Vec<Box<dyn LogSink>>,
}

impl Tee {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl LogSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl LogSink for Tee {
    fn record(&mut self, entry: &Timestamp) {
        for sink in &mut self.sinks {
            sink.record(entry);
        }
    }

    fn flush(&mut self) {
        for sink in &mut self.sinks {
            sink.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Timestamp {
        Timestamp {
            time: 1.5,
            message: "gen0".into(),
            seq_num: 3,
            resource: "res0".into(),
            event: "pipe.in".into(),
            properties: vec![("priority".into(), json!(2)), ("size".into(), json!("NA"))],
        }
    }

    #[test]
    fn test_csv_line() {
        assert_eq!(sample().to_csv(), "1.500000000,gen0,3,res0,pipe.in,2,NA");
        assert_eq!(
            Timestamp::header(&["priority".into()]),
            "timestamp,message,seq_num,resource,event,priority"
        );
    }

    #[test]
    fn test_memory_sink_clones_share_buffer() {
        let sink = MemorySink::new();
        let mut writer: Box<dyn LogSink> = Box::new(sink.clone());
        writer.record(&sample());
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.with_event("pipe.in").len(), 1);
        assert!(sink.with_event("pipe.out").is_empty());
    }

    #[test]
    fn test_tee_feeds_every_sink() {
        let a = MemorySink::new();
        let b = MemorySink::new();
        let mut tee = Tee::new().with(a.clone()).with(b.clone());
        tee.record(&sample());
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }
}
