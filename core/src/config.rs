use serde::{Deserialize, Serialize};

use crate::engine::SimTime;

/// Run-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub id: String,
    pub seed: u64,
    /// Default horizon for [`Simulation::run`](crate::Simulation::run) when
    /// none is given. `None` runs until no events remain.
    pub until: Option<SimTime>,
    /// Message properties copied into every log record, in column order.
    pub log_properties: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { id: "sim".into(), seed: 42, until: None, log_properties: Vec::new() }
    }
}

impl SimulationConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_until(mut self, until: SimTime) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_log_property(mut self, name: impl Into<String>) -> Self {
        self.log_properties.push(name.into());
        self
    }
}

/// Declarative description of a resource, as accepted by
/// [`Simulation::add_resource_spec`](crate::Simulation::add_resource_spec).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResourceSpec {
    pub id: String,
    pub capacity: usize,
    pub service: String,
    pub service_config: serde_json::Value,
    pub pipe: String,
    pub pipe_config: serde_json::Value,
    pub log: bool,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            capacity: 1,
            service: "default".into(),
            service_config: serde_json::Value::Null,
            pipe: "fifo".into(),
            pipe_config: serde_json::Value::Null,
            log: true,
        }
    }
}
