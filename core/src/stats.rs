use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use hdrhistogram::{CreationError, Histogram};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::engine::SimTime;
use crate::trace::{LogSink, Timestamp};

/// Histogram resolution: simulated time is recorded in units of
/// `1 / DEFAULT_RESOLUTION`.
pub const DEFAULT_RESOLUTION: f64 = 1_000.0;

/// Per-resource summary derived from the log stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceReport {
    pub resource: String,
    pub arrivals: u64,
    pub served: u64,
    pub preempted: u64,
    pub dropped: IndexMap<String, u64>,
    pub mean_wait: Option<f64>,
    pub p50_wait: Option<f64>,
    pub p99_wait: Option<f64>,
    pub p50_sojourn: Option<f64>,
    pub p99_sojourn: Option<f64>,
}

struct ResourceStats {
    arrivals: u64,
    served: u64,
    preempted: u64,
    dropped: IndexMap<String, u64>,
    wait: Histogram<u64>,
    sojourn: Histogram<u64>,
}

impl ResourceStats {
    fn new() -> Result<Self, CreationError> {
        Ok(Self {
            arrivals: 0,
            served: 0,
            preempted: 0,
            dropped: IndexMap::new(),
            wait: Histogram::new(3)?,
            sojourn: Histogram::new(3)?,
        })
    }
}

type Visit = (String, u64, String);

struct MetricsState {
    resolution: f64,
    resources: IndexMap<String, ResourceStats>,
    entered: HashMap<Visit, SimTime>,
}

impl MetricsState {
    fn scaled(&self, value: SimTime) -> u64 {
        (value.max(0.0) * self.resolution).round() as u64
    }

    fn percentile(&self, h: &Histogram<u64>, p: f64) -> Option<f64> {
        (!h.is_empty()).then(|| h.value_at_quantile(p / 100.0) as f64 / self.resolution)
    }

    fn observe(&mut self, entry: &Timestamp) {
        let visit = (entry.message.clone(), entry.seq_num, entry.resource.clone());
        let event = entry.event.as_str();
        match event {
            "pipe.in" => {
                self.entered.insert(visit, entry.time);
                if let Some(stats) = self.stats(&entry.resource) {
                    stats.arrivals += 1;
                }
            }
            "pipe.out" => {
                let wait = self.entered.get(&visit).map(|since| self.scaled(entry.time - since));
                if let (Some(wait), Some(stats)) = (wait, self.stats(&entry.resource)) {
                    stats.wait.saturating_record(wait);
                }
            }
            "resource.serve" => {
                let since = self.entered.remove(&visit);
                let sojourn = since.map(|t| self.scaled(entry.time - t));
                let Some(stats) = self.stats(&entry.resource) else { return };
                stats.served += 1;
                if let Some(sojourn) = sojourn {
                    stats.sojourn.saturating_record(sojourn);
                }
            }
            "resource.preempted" => {
                if let Some(stats) = self.stats(&entry.resource) {
                    stats.preempted += 1;
                }
            }
            _ => {
                let Some((scope, cause)) = event.rsplit_once('.') else { return };
                if !(scope.starts_with("pipe") || scope == "resource" || scope == "generator") {
                    return;
                }
                self.entered.remove(&visit);
                if let Some(stats) = self.stats(&entry.resource) {
                    *stats.dropped.entry(cause.to_string()).or_default() += 1;
                }
            }
        }
    }

    fn stats(&mut self, resource: &str) -> Option<&mut ResourceStats> {
        if !self.resources.contains_key(resource) {
            match ResourceStats::new() {
                Ok(stats) => {
                    self.resources.insert(resource.to_string(), stats);
                }
                Err(err) => {
                    log::error!("no metrics for '{resource}': {err}");
                    return None;
                }
            }
        }
        self.resources.get_mut(resource)
    }
}

/// Log sink accumulating per-resource counters and wait/sojourn
/// distributions. Clones share the same state.
#[derive(Clone)]
pub struct MetricsSink {
    state: Rc<RefCell<MetricsState>>,
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLUTION)
    }
}

impl MetricsSink {
    pub fn new(resolution: f64) -> Self {
        Self {
            state: Rc::new(RefCell::new(MetricsState {
                resolution,
                resources: IndexMap::new(),
                entered: HashMap::new(),
            })),
        }
    }

    pub fn report(&self) -> Vec<ResourceReport> {
        let state = self.state.borrow();
        state
            .resources
            .iter()
            .map(|(id, s)| ResourceReport {
                resource: id.clone(),
                arrivals: s.arrivals,
                served: s.served,
                preempted: s.preempted,
                dropped: s.dropped.clone(),
                mean_wait: (!s.wait.is_empty()).then(|| s.wait.mean() / state.resolution),
                p50_wait: state.percentile(&s.wait, 50.0),
                p99_wait: state.percentile(&s.wait, 99.0),
                p50_sojourn: state.percentile(&s.sojourn, 50.0),
                p99_sojourn: state.percentile(&s.sojourn, 99.0),
            })
            .collect()
    }

    pub fn resource(&self, id: &str) -> Option<ResourceReport> {
        self.report().into_iter().find(|r| r.resource == id)
    }

    pub fn reset(&self) {
        let mut state = self.state.borrow_mut();
        state.resources.clear();
        state.entered.clear();
    }
}

impl LogSink for MetricsSink {
    fn record(&mut self, entry: &Timestamp) {
        self.state.borrow_mut().observe(entry);
    }
}
