use thiserror::Error;

/// Errors surfaced by the simulation kernel and the topology builder.
///
/// Drops caused by full queues, expired lifetimes or preemption are not
/// errors: they are ordinary outcomes recorded in the log stream.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("resource '{0}' is already registered")]
    DuplicateResource(String),

    #[error("resource '{0}' is not registered")]
    UnknownResource(String),

    #[error("resource '{0}' needs a capacity of at least one")]
    ZeroCapacity(String),

    #[error("pipeline {0} is not registered")]
    UnknownPipeline(usize),

    #[error("no {kind} behavior registered under '{name}'")]
    UnknownBehavior { kind: &'static str, name: String },

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("invalid behavior config: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    #[error("event has already been triggered")]
    EventAlreadyTriggered,

    #[error("process {0} has already finished")]
    ProcessFinished(u64),

    #[error("cannot schedule an event {0} time units in the past")]
    NegativeDelay(f64),

    #[error("message has no subscription '{0}'")]
    UnknownSubscription(String),

    #[error("resource '{resource}' has no task {task}")]
    UnknownTask { resource: String, task: u64 },

    #[error("handle outlived its simulation")]
    Detached,
}

pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = SimError::DuplicateResource("res0".into());
        assert_eq!(e.to_string(), "resource 'res0' is already registered");

        let e = SimError::UnknownBehavior { kind: "pipe", name: "lifo".into() };
        assert!(e.to_string().contains("lifo"));
    }

    #[test]
    fn test_config_error_converts() {
        let bad = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let e: SimError = bad.into();
        assert!(matches!(e, SimError::InvalidConfig(_)));
    }
}
